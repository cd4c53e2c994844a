use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::LABEL_PATTERN;
use crate::progress::ProgressSink;
use crate::registry::SourceDescriptor;
use crate::runner::{run_source, RunnerConfig};

/// Final, deduplicated, in-scope result for one target, with the number of
/// new names each source contributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub subdomains: Vec<String>,
    pub contributions: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub runner: RunnerConfig,
    /// Hard cap on subdomains kept per target; 0 disables the cap.
    pub max_subdomains: usize,
}

/// Matches names strictly below the apex; the apex itself and sibling or
/// unrelated names a source may emit are out of scope.
fn scope_regex(apex: &str) -> Regex {
    Regex::new(&format!(
        r"^({label}\.)+{apex}$",
        label = LABEL_PATTERN,
        apex = regex::escape(apex)
    ))
    .unwrap()
}

/// Launch every selected source against the target, merge results in
/// completion order, and credit each source with the in-scope names it was
/// first to produce. A failing source contributes an empty set; peers are
/// never cancelled on its behalf.
pub async fn scan_target(
    target: &str,
    descriptors: &BTreeMap<String, Arc<SourceDescriptor>>,
    client: &Client,
    config: &ScanConfig,
    sink: Arc<dyn ProgressSink>,
) -> TargetReport {
    let scope = scope_regex(target);

    let mut tasks = FuturesUnordered::new();
    for descriptor in descriptors.values() {
        let descriptor = Arc::clone(descriptor);
        let sink = Arc::clone(&sink);
        tasks.push(async move {
            let result = run_source(&descriptor, target, client, &config.runner, sink).await;
            (descriptor.name.clone(), result)
        });
    }

    let mut union: HashSet<String> = HashSet::new();
    let mut contributions: BTreeMap<String, usize> = BTreeMap::new();
    while let Some((name, result)) = tasks.next().await {
        let mut fresh = 0;
        for subdomain in result.subdomains {
            if scope.is_match(&subdomain) && union.insert(subdomain) {
                fresh += 1;
            }
        }
        contributions.insert(name, fresh);
    }

    let mut subdomains: Vec<String> = union.into_iter().collect();
    subdomains.sort();
    if config.max_subdomains > 0 && subdomains.len() > config.max_subdomains {
        warn!(
            "{target}: keeping {} of {} subdomains (--max-subdomains)",
            config.max_subdomains,
            subdomains.len()
        );
        subdomains.truncate(config.max_subdomains);
    }

    TargetReport {
        subdomains,
        contributions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullSink;
    use crate::registry::SourceDescriptor;
    use std::time::Duration;

    fn scan_config() -> ScanConfig {
        ScanConfig {
            runner: RunnerConfig {
                task_timeout: Duration::from_secs(5),
                api_retries: 3,
            },
            max_subdomains: 0,
        }
    }

    #[test]
    fn scope_excludes_apex_and_foreign_names() {
        let scope = scope_regex("example.com");
        assert!(scope.is_match("a.example.com"));
        assert!(scope.is_match("deep.a.example.com"));
        assert!(!scope.is_match("example.com"));
        assert!(!scope.is_match("evil.org"));
        assert!(!scope.is_match("example.com.evil.org"));
        assert!(!scope.is_match("notexample.com"));
        assert!(!scope.is_match("a.anexample.com"));
    }

    #[test]
    fn scope_escapes_regex_metacharacters_in_the_apex() {
        let scope = scope_regex("example.com");
        // an unescaped '.' would let this through
        assert!(!scope.is_match("a.exampleXcom"));
    }

    fn first_command(_domain: &str) -> Vec<String> {
        vec![
            "printf".to_string(),
            "a.example.com\\nb.example.com\\nexample.com\\n".to_string(),
        ]
    }

    fn second_command(_domain: &str) -> Vec<String> {
        vec![
            "printf".to_string(),
            "b.example.com\\nc.example.com\\nevil.org\\n".to_string(),
        ]
    }

    fn broken_command(_domain: &str) -> Vec<String> {
        vec!["false".to_string()]
    }

    fn descriptors(
        entries: Vec<SourceDescriptor>,
    ) -> BTreeMap<String, Arc<SourceDescriptor>> {
        entries
            .into_iter()
            .map(|d| (d.name.clone(), Arc::new(d)))
            .collect()
    }

    #[tokio::test]
    async fn merge_deduplicates_filters_scope_and_credits_once() {
        let sources = descriptors(vec![
            SourceDescriptor::tool("first", first_command),
            SourceDescriptor::tool("second", second_command),
        ]);
        let report = scan_target(
            "example.com",
            &sources,
            &Client::new(),
            &scan_config(),
            Arc::new(NullSink),
        )
        .await;

        assert_eq!(
            report.subdomains,
            vec!["a.example.com", "b.example.com", "c.example.com"]
        );
        // overlap is credited exactly once, whichever source finished first
        let total: usize = report.contributions.values().sum();
        assert_eq!(total, report.subdomains.len());
        assert_eq!(report.contributions.len(), 2);
    }

    #[tokio::test]
    async fn failing_source_never_poisons_the_report() {
        let sources = descriptors(vec![
            SourceDescriptor::tool("first", first_command),
            SourceDescriptor::tool("broken", broken_command),
        ]);
        let report = scan_target(
            "example.com",
            &sources,
            &Client::new(),
            &scan_config(),
            Arc::new(NullSink),
        )
        .await;

        assert_eq!(report.subdomains, vec!["a.example.com", "b.example.com"]);
        assert_eq!(report.contributions["broken"], 0);
        assert_eq!(report.contributions["first"], 2);
    }

    #[tokio::test]
    async fn rerun_with_deterministic_sources_is_stable() {
        let sources = descriptors(vec![
            SourceDescriptor::tool("first", first_command),
            SourceDescriptor::tool("second", second_command),
        ]);
        let config = scan_config();
        let client = Client::new();
        let one = scan_target("example.com", &sources, &client, &config, Arc::new(NullSink)).await;
        let two = scan_target("example.com", &sources, &client, &config, Arc::new(NullSink)).await;
        // equal modulo contribution credit, which may differ by completion order
        assert_eq!(one.subdomains, two.subdomains);
        assert_eq!(
            one.contributions.values().sum::<usize>(),
            two.contributions.values().sum::<usize>()
        );
    }

    #[tokio::test]
    async fn cap_truncates_the_sorted_list() {
        let sources = descriptors(vec![SourceDescriptor::tool("first", first_command)]);
        let mut config = scan_config();
        config.max_subdomains = 1;
        let report = scan_target(
            "example.com",
            &sources,
            &Client::new(),
            &config,
            Arc::new(NullSink),
        )
        .await;
        assert_eq!(report.subdomains, vec!["a.example.com"]);
    }
}
