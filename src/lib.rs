pub mod args;
pub mod cache;
pub mod constants;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod progress;
pub mod registry;
pub mod runner;
pub mod validator;

pub use args::Args;
pub use errors::EngineError;
pub use orchestrator::TargetReport;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{redirect::Policy, Client};
use tokio::time::timeout;
use tracing::{error, warn};

use cache::CacheStore;
use orchestrator::{scan_target, ScanConfig};
use output::{write_report, OutputOptions};
use progress::{ConsoleSink, NullSink, ProgressSink, SourceStatus};
use registry::{load_sources, ApiAuth, SourceKind};
use runner::RunnerConfig;

pub async fn run(args: Args) -> Result<(), EngineError> {
    logging::init(args.silent, args.debug);

    if args.list_plugins {
        list_plugins();
        return Ok(());
    }

    let targets = collect_targets(&args)?;
    let sources = load_sources(args.use_plugins.as_deref(), args.exclude_plugins.as_deref());
    if sources.is_empty() {
        return Err(EngineError::NoSources);
    }

    let client = Client::builder()
        .connect_timeout(constants::CONNECT_TIMEOUT)
        .redirect(Policy::limited(2))
        .danger_accept_invalid_certs(args.insecure)
        .pool_idle_timeout(Some(Duration::from_secs(30)))
        .build()?;

    let cache = match (&args.cache_dir, args.no_cache) {
        (Some(dir), false) => match CacheStore::open(dir, sources.keys().map(String::as_str)) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("cache disabled: {e}");
                None
            }
        },
        _ => None,
    };

    let config = ScanConfig {
        runner: RunnerConfig {
            task_timeout: Duration::from_secs(args.timeout),
            api_retries: args.api_retries,
        },
        max_subdomains: args.max_subdomains,
    };

    for (index, target) in targets.iter().enumerate() {
        let options = args.output.as_deref().map(|path| OutputOptions {
            path,
            overwrite: args.overwrite,
            target_index: index + 1,
            total_targets: targets.len(),
        });

        if let Some(store) = &cache {
            let store = store.clone();
            let lookup = target.clone();
            let hit = tokio::task::spawn_blocking(move || store.load(&lookup))
                .await
                .unwrap_or(None);
            if let Some(report) = hit {
                println!(
                    "[+] {target}: {} unique subdomains (cached)",
                    report.subdomains.len()
                );
                if let Some(options) = &options {
                    write_report(target, &report, options);
                }
                continue;
            }
        }

        println!("[*] scanning {target} with {} sources", sources.len());
        let sink: Arc<dyn ProgressSink> = if args.no_progress || args.silent {
            Arc::new(NullSink)
        } else {
            Arc::new(ConsoleSink::new(sources.keys().cloned()))
        };

        let scan = scan_target(target, &sources, &client, &config, Arc::clone(&sink));
        let report = match args.global_timeout {
            Some(secs) => match timeout(Duration::from_secs(secs), scan).await {
                Ok(report) => report,
                Err(_) => {
                    // dropping the scan future cancelled every runner
                    for name in sources.keys() {
                        sink.update(name, 0, Some(SourceStatus::Timeout)).await;
                    }
                    error!("scan of {target} abandoned after the {secs}s global timeout");
                    continue;
                }
            },
            None => scan.await,
        };

        println!("[+] {target}: {} unique subdomains", report.subdomains.len());

        if let Some(store) = &cache {
            let store = store.clone();
            let scanned = target.clone();
            let persisted = report.clone();
            let _ = tokio::task::spawn_blocking(move || store.store(&scanned, &persisted)).await;
        }
        if let Some(options) = &options {
            write_report(target, &report, options);
        }
    }

    Ok(())
}

fn list_plugins() {
    println!("available sources:");
    for descriptor in registry::builtin_sources() {
        let note = match &descriptor.kind {
            SourceKind::Api {
                auth: Some(ApiAuth::EnvBearer(var)),
                ..
            } => format!(" (requires {var})"),
            _ => String::new(),
        };
        println!("  {:<5} {}{note}", descriptor.kind_label(), descriptor.name);
    }
}

/// Validate and IDN-normalize the requested targets; invalid entries are
/// skipped with a warning, an empty result is fatal.
fn collect_targets(args: &Args) -> Result<Vec<String>, EngineError> {
    let mut targets = Vec::new();
    let mut push = |raw: &str| {
        let candidate = validator::normalize(raw);
        if candidate.is_empty() {
            return;
        }
        if !validator::is_valid(&candidate) {
            warn!("invalid target domain skipped: '{raw}'");
            return;
        }
        match validator::to_ascii(&candidate) {
            Some(ascii) => targets.push(ascii),
            None => warn!("target '{raw}' could not be IDN-encoded, skipped"),
        }
    };

    if let Some(path) = &args.input {
        let content =
            fs::read_to_string(path).map_err(|e| EngineError::InputFile(path.clone(), e))?;
        for line in content.lines() {
            push(line);
        }
    } else if let Some(domain) = &args.domain {
        push(domain);
    }

    if targets.is_empty() {
        return Err(EngineError::NoTargets);
    }
    Ok(targets)
}
