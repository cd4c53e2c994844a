use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::Local;
use csv::Writer;
use itertools::Itertools;
use tracing::{error, info, warn};

use crate::orchestrator::TargetReport;

const KNOWN_FORMATS: &[&str] = &["txt", "json", "csv", "html", "burp", "gnmap"];

pub struct OutputOptions<'a> {
    /// Raw --output value; `%d` expands to the target domain.
    pub path: &'a str,
    pub overwrite: bool,
    /// 1-based position of this target in the batch.
    pub target_index: usize,
    pub total_targets: usize,
}

/// Resolve the output path for one target and hand the report to the writer
/// for its extension. Refuses paths outside the working directory and
/// existing files unless --overwrite is set; neither refusal is fatal.
pub fn write_report(target: &str, report: &TargetReport, options: &OutputOptions<'_>) {
    let wants_html = options.path.ends_with(".html");
    if report.subdomains.is_empty() && !wants_html {
        warn!("no subdomains found for {target}, output skipped");
        return;
    }

    let mut raw = options.path.to_string();
    if !raw.contains("%d") && options.total_targets > 1 {
        raw = indexed_path(&raw, options.target_index);
    }
    let path = PathBuf::from(raw.replace("%d", target));

    if escapes_working_dir(&path) {
        error!(
            "output path {} is outside the working directory, write refused",
            path.display()
        );
        return;
    }
    if path.exists() && !options.overwrite {
        warn!(
            "output file {} exists, pass --overwrite to replace it",
            path.display()
        );
        return;
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let (path, ext) = if KNOWN_FORMATS.contains(&ext.as_str()) {
        (path, ext)
    } else {
        warn!("unrecognized output format '{ext}', writing plain text instead");
        (path.with_extension("txt"), "txt".to_string())
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("could not create {}: {e}", parent.display());
                return;
            }
        }
    }

    let outcome = match ext.as_str() {
        "json" => write_json(&path, report),
        "csv" => write_csv(&path, report),
        "html" => write_html(&path, target, report),
        // burp target scope and nmap -iL both take one hostname per line
        _ => write_txt(&path, report),
    };
    match outcome {
        Ok(()) => info!("results for {target} written to {}", path.display()),
        Err(e) => error!("could not write {}: {e}", path.display()),
    }
}

/// `report.txt` scanned third becomes `report-3.txt`.
fn indexed_path(raw: &str, index: usize) -> String {
    let path = Path::new(raw);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}-{index}.{ext}"),
        None => format!("{stem}-{index}"),
    };
    path.with_file_name(name).to_string_lossy().into_owned()
}

fn escapes_working_dir(path: &Path) -> bool {
    if path.is_absolute() {
        match std::env::current_dir() {
            Ok(cwd) => !path.starts_with(&cwd),
            Err(_) => true,
        }
    } else {
        path.components()
            .any(|component| matches!(component, Component::ParentDir))
    }
}

fn write_txt(path: &Path, report: &TargetReport) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = File::create(path)?;
    for subdomain in &report.subdomains {
        writeln!(file, "{subdomain}")?;
    }
    Ok(())
}

fn write_json(path: &Path, report: &TargetReport) -> Result<(), Box<dyn std::error::Error>> {
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

fn write_csv(path: &Path, report: &TargetReport) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["subdomain"])?;
    for subdomain in &report.subdomains {
        writer.write_record([subdomain.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_html(
    path: &Path,
    target: &str,
    report: &TargetReport,
) -> Result<(), Box<dyn std::error::Error>> {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let rows = report
        .subdomains
        .iter()
        .map(|subdomain| format!("      <tr><td>{subdomain}</td></tr>"))
        .join("\n");
    let sources = report
        .contributions
        .iter()
        .sorted_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)))
        .map(|(name, count)| format!("      <tr><td>{name}</td><td>{count}</td></tr>"))
        .join("\n");

    let page = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>subsweep report: {target}</title>
  <style>
    body {{ font-family: sans-serif; margin: 2rem; color: #222; }}
    table {{ border-collapse: collapse; margin-bottom: 2rem; }}
    th, td {{ border: 1px solid #ccc; padding: 0.3rem 0.8rem; text-align: left; }}
    th {{ background: #f0f0f0; }}
    footer {{ color: #888; font-size: 0.85rem; }}
  </style>
</head>
<body>
  <h1>{target}</h1>
  <p>{count} unique subdomains</p>
  <table>
    <thead><tr><th>Subdomain</th></tr></thead>
    <tbody>
{rows}
    </tbody>
  </table>
  <h2>Sources</h2>
  <table>
    <thead><tr><th>Source</th><th>New subdomains</th></tr></thead>
    <tbody>
{sources}
    </tbody>
  </table>
  <footer>generated by subsweep {version} on {timestamp}</footer>
</body>
</html>
"#,
        count = report.subdomains.len(),
        version = crate::constants::VERSION,
    );
    fs::write(path, page)?;
    Ok(())
}
