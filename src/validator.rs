use std::net::IpAddr;

use crate::constants::DOMAIN_REGEX;

/// Lowercase, strip surrounding whitespace and a single leading wildcard
/// label. `" *.Dev.Example.COM "` becomes `"dev.example.com"`.
pub fn normalize(candidate: &str) -> String {
    let candidate = candidate.trim().to_lowercase();
    match candidate.strip_prefix("*.") {
        Some(rest) => rest.to_string(),
        None => candidate,
    }
}

/// Syntactic domain acceptance. Rejects IP literals and synthetic numeric
/// TLDs that tools sometimes emit, while still accepting punycoded IDNs.
pub fn is_valid(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }
    if domain.parse::<IpAddr>().is_ok() {
        return false;
    }
    let ascii = match idna::domain_to_ascii(domain) {
        Ok(ascii) => ascii,
        Err(_) => return false,
    };
    if !DOMAIN_REGEX.is_match(&ascii) {
        return false;
    }
    let tld = match ascii.rsplit('.').next() {
        Some(tld) => tld,
        None => return false,
    };
    if tld.len() < 2 {
        return false;
    }
    tld.starts_with("xn--") || !tld.chars().any(|c| c.is_ascii_digit())
}

/// IDN/ASCII form of a domain, as used for cache keys and scope checks.
pub fn to_ascii(domain: &str) -> Option<String> {
    idna::domain_to_ascii(domain).ok()
}
