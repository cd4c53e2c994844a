use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::SourceError;

/// Decoded HTTP response body handed to an API parser.
#[derive(Debug, Clone)]
pub enum Payload {
    Json(Value),
    Text(String),
}

pub type ApiParser = fn(Payload) -> Result<HashSet<String>, SourceError>;
pub type CommandBuilder = fn(&str) -> Vec<String>;

/// Where an API source finds its credential.
#[derive(Debug, Clone)]
pub enum ApiAuth {
    /// `Authorization: Bearer <value of env var>`; omitted when unset.
    EnvBearer(String),
    /// Verbatim `Authorization` header value.
    Header(String),
}

pub enum SourceKind {
    Tool {
        build_command: CommandBuilder,
    },
    Api {
        url_template: String,
        parser: ApiParser,
        json: bool,
        auth: Option<ApiAuth>,
    },
}

pub struct SourceDescriptor {
    pub name: String,
    pub kind: SourceKind,
}

impl SourceDescriptor {
    pub fn tool(name: &str, build_command: CommandBuilder) -> Self {
        Self {
            name: name.to_string(),
            kind: SourceKind::Tool { build_command },
        }
    }

    pub fn api(name: &str, url_template: &str, parser: ApiParser) -> Self {
        Self {
            name: name.to_string(),
            kind: SourceKind::Api {
                url_template: url_template.to_string(),
                parser,
                json: true,
                auth: None,
            },
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            SourceKind::Tool { .. } => "tool",
            SourceKind::Api { .. } => "api",
        }
    }
}

/// Gate the built-in registry and return the survivors keyed by name.
pub fn load_sources(
    use_only: Option<&[String]>,
    exclude: Option<&[String]>,
) -> BTreeMap<String, Arc<SourceDescriptor>> {
    gate(builtin_sources(), use_only, exclude)
}

fn gate(
    descriptors: Vec<SourceDescriptor>,
    use_only: Option<&[String]>,
    exclude: Option<&[String]>,
) -> BTreeMap<String, Arc<SourceDescriptor>> {
    let use_only: Option<Vec<String>> =
        use_only.map(|names| names.iter().map(|n| n.trim().to_lowercase()).collect());
    let exclude: Option<Vec<String>> =
        exclude.map(|names| names.iter().map(|n| n.trim().to_lowercase()).collect());

    let mut selected = BTreeMap::new();
    for descriptor in descriptors {
        if let Err(reason) = check_contract(&descriptor) {
            warn!("source '{}' skipped: {reason}", descriptor.name);
            continue;
        }
        let name_lower = descriptor.name.to_lowercase();
        if let Some(only) = &use_only {
            if !only.contains(&name_lower) {
                debug!("source '{}' not selected, skipped", descriptor.name);
                continue;
            }
        }
        if let Some(excluded) = &exclude {
            if excluded.contains(&name_lower) {
                debug!("source '{}' excluded, skipped", descriptor.name);
                continue;
            }
        }
        if let SourceKind::Tool { build_command } = &descriptor.kind {
            let argv = build_command("example.com");
            if which::which(&argv[0]).is_err() {
                warn!(
                    "tool '{}' not found on PATH, source '{}' skipped",
                    argv[0], descriptor.name
                );
                continue;
            }
        }
        let name = descriptor.name.clone();
        if selected.insert(name.clone(), Arc::new(descriptor)).is_some() {
            warn!("duplicate source name '{name}', keeping the later definition");
        }
    }
    selected
}

fn check_contract(descriptor: &SourceDescriptor) -> Result<(), String> {
    if descriptor.name.trim().is_empty() {
        return Err("empty source name".to_string());
    }
    match &descriptor.kind {
        SourceKind::Tool { build_command } => {
            let argv = build_command("example.com");
            if argv.is_empty() {
                return Err("command builder produced an empty argv".to_string());
            }
            if !argv.iter().any(|token| token.contains("example.com")) {
                return Err("command builder ignores the target domain".to_string());
            }
        }
        SourceKind::Api { url_template, .. } => {
            if !url_template.contains("{domain}") {
                return Err("url template lacks the {domain} placeholder".to_string());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Built-in sources
// ---------------------------------------------------------------------------

pub fn builtin_sources() -> Vec<SourceDescriptor> {
    vec![
        SourceDescriptor::tool("subfinder", subfinder_command),
        SourceDescriptor::tool("assetfinder", assetfinder_command),
        SourceDescriptor::tool("findomain", findomain_command),
        SourceDescriptor::api(
            "crt.sh",
            "https://crt.sh/?q=%25.{domain}&output=json",
            parse_crtsh,
        ),
        SourceDescriptor::api(
            "certspotter",
            "https://api.certspotter.com/v1/issuances?domain={domain}&include_subdomains=true&expand=dns_names",
            parse_certspotter,
        ),
        SourceDescriptor::api(
            "alienvault",
            "https://otx.alienvault.com/api/v1/indicators/domain/{domain}/passive_dns",
            parse_alienvault,
        ),
        SourceDescriptor {
            name: "hackertarget".to_string(),
            kind: SourceKind::Api {
                url_template: "https://api.hackertarget.com/hostsearch/?q={domain}".to_string(),
                parser: parse_hackertarget,
                json: false,
                auth: None,
            },
        },
        SourceDescriptor {
            name: "chaos".to_string(),
            kind: SourceKind::Api {
                url_template: "https://dns.projectdiscovery.io/dns/{domain}/subdomains"
                    .to_string(),
                parser: parse_chaos,
                json: true,
                auth: Some(ApiAuth::EnvBearer("CHAOS_KEY".to_string())),
            },
        },
        SourceDescriptor::api(
            "wayback",
            "https://web.archive.org/cdx/search/cdx?url=*.{domain}&output=json&fl=original&collapse=urlkey",
            parse_wayback,
        ),
    ]
}

fn subfinder_command(domain: &str) -> Vec<String> {
    vec![
        "subfinder".to_string(),
        "-d".to_string(),
        domain.to_string(),
        "-silent".to_string(),
    ]
}

fn assetfinder_command(domain: &str) -> Vec<String> {
    vec![
        "assetfinder".to_string(),
        "--subs-only".to_string(),
        domain.to_string(),
    ]
}

fn findomain_command(domain: &str) -> Vec<String> {
    vec![
        "findomain".to_string(),
        "-t".to_string(),
        domain.to_string(),
        "-q".to_string(),
    ]
}

/// crt.sh: array of issuance records whose `name_value` packs one name per
/// line.
fn parse_crtsh(payload: Payload) -> Result<HashSet<String>, SourceError> {
    let Payload::Json(Value::Array(entries)) = payload else {
        return Err(SourceError::Shape("expected a JSON array of issuances"));
    };
    let mut subdomains = HashSet::new();
    for entry in &entries {
        if let Some(names) = entry.get("name_value").and_then(Value::as_str) {
            subdomains.extend(
                names
                    .split('\n')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(String::from),
            );
        }
    }
    Ok(subdomains)
}

fn parse_certspotter(payload: Payload) -> Result<HashSet<String>, SourceError> {
    let Payload::Json(Value::Array(issuances)) = payload else {
        return Err(SourceError::Shape("expected a JSON array of issuances"));
    };
    let mut subdomains = HashSet::new();
    for issuance in &issuances {
        if let Some(names) = issuance.get("dns_names").and_then(Value::as_array) {
            subdomains.extend(names.iter().filter_map(Value::as_str).map(String::from));
        }
    }
    Ok(subdomains)
}

fn parse_alienvault(payload: Payload) -> Result<HashSet<String>, SourceError> {
    let Payload::Json(Value::Object(body)) = payload else {
        return Err(SourceError::Shape("expected a JSON object"));
    };
    let Some(records) = body.get("passive_dns").and_then(Value::as_array) else {
        return Err(SourceError::Shape("missing passive_dns records"));
    };
    Ok(records
        .iter()
        .filter_map(|record| record.get("hostname").and_then(Value::as_str))
        .filter(|hostname| !hostname.is_empty())
        .map(String::from)
        .collect())
}

/// hackertarget answers plain text, one `host,ip` pair per line.
fn parse_hackertarget(payload: Payload) -> Result<HashSet<String>, SourceError> {
    let Payload::Text(body) = payload else {
        return Err(SourceError::Shape("expected a plain text body"));
    };
    Ok(body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| line.split(',').next())
        .map(String::from)
        .collect())
}

fn parse_chaos(payload: Payload) -> Result<HashSet<String>, SourceError> {
    let Payload::Json(Value::Object(body)) = payload else {
        return Err(SourceError::Shape("expected a JSON object"));
    };
    let Some(domain) = body.get("domain").and_then(Value::as_str) else {
        return Err(SourceError::Shape("missing domain field"));
    };
    let Some(subdomains) = body.get("subdomains").and_then(Value::as_array) else {
        return Err(SourceError::Shape("missing subdomains field"));
    };
    Ok(subdomains
        .iter()
        .filter_map(Value::as_str)
        .map(|label| format!("{label}.{domain}"))
        .collect())
}

/// Wayback CDX: array-of-arrays of archived URLs; the first row is a header.
fn parse_wayback(payload: Payload) -> Result<HashSet<String>, SourceError> {
    let Payload::Json(Value::Array(rows)) = payload else {
        return Err(SourceError::Shape("expected a JSON array of rows"));
    };
    Ok(rows
        .iter()
        .filter_map(Value::as_array)
        .filter_map(|row| row.first().and_then(Value::as_str))
        .filter_map(|archived| url::Url::parse(archived).ok())
        .filter_map(|parsed| parsed.host_str().map(String::from))
        .collect())
}
