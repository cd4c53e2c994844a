use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const USER_AGENT: &str = concat!("subsweep/", env!("CARGO_PKG_VERSION"));

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub const CACHE_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

pub const CACHE_LOCK_POLL: Duration = Duration::from_millis(50);

/// One DNS label: alphanumeric edges, up to 63 characters.
pub const LABEL_PATTERN: &str = "[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?";

pub static DOMAIN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^({label}\.)+{label}$", label = LABEL_PATTERN)).unwrap()
});
