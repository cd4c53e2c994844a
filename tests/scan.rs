use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use subsweep::errors::SourceError;
use subsweep::orchestrator::{scan_target, ScanConfig};
use subsweep::progress::{NullSink, ProgressSink, SourceStatus};
use subsweep::registry::{ApiAuth, Payload, SourceDescriptor, SourceKind};
use subsweep::runner::{run_source, RunnerConfig};

/// Minimal HTTP endpoint: answers each connection with the next canned
/// reply, repeating the last one once the list is spent. Returns the bound
/// address, a hit counter and the first request's raw text.
async fn spawn_server(
    replies: Vec<(u16, String)>,
) -> (SocketAddr, Arc<AtomicUsize>, Arc<Mutex<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let first_request = Arc::new(Mutex::new(String::new()));

    let hit_counter = Arc::clone(&hits);
    let request_log = Arc::clone(&first_request);
    tokio::spawn(async move {
        let mut replies = replies.into_iter();
        let mut last: Option<(u16, String)> = None;
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let hit = hit_counter.fetch_add(1, Ordering::SeqCst);
            let (status, body) = match replies.next().or_else(|| last.clone()) {
                Some(reply) => {
                    last = Some(reply.clone());
                    reply
                }
                None => break,
            };

            let mut buf = vec![0u8; 4096];
            let read = socket.read(&mut buf).await.unwrap_or(0);
            if hit == 0 {
                let mut log = request_log.lock().unwrap();
                *log = String::from_utf8_lossy(&buf[..read]).into_owned();
            }

            let response = format!(
                "HTTP/1.1 {status} OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });

    (addr, hits, first_request)
}

/// Records every callback so tests can assert the progress protocol.
struct RecordingSink {
    events: Mutex<Vec<(String, usize, Option<SourceStatus>)>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl ProgressSink for RecordingSink {
    async fn update(&self, source: &str, count_increment: usize, status: Option<SourceStatus>) {
        self.events
            .lock()
            .unwrap()
            .push((source.to_string(), count_increment, status));
    }
}

fn parse_subdomains(payload: Payload) -> Result<HashSet<String>, SourceError> {
    let Payload::Json(body) = payload else {
        return Err(SourceError::Shape("expected JSON"));
    };
    let Some(names) = body.get("subdomains").and_then(|v| v.as_array()) else {
        return Err(SourceError::Shape("missing subdomains field"));
    };
    Ok(names
        .iter()
        .filter_map(|v| v.as_str())
        .map(String::from)
        .collect())
}

fn reject_everything(_payload: Payload) -> Result<HashSet<String>, SourceError> {
    Err(SourceError::Shape("not a set of names"))
}

fn api_descriptor(name: &str, addr: SocketAddr, parser: subsweep::registry::ApiParser) -> SourceDescriptor {
    SourceDescriptor {
        name: name.to_string(),
        kind: SourceKind::Api {
            url_template: format!("http://{addr}/search?q={{domain}}"),
            parser,
            json: true,
            auth: None,
        },
    }
}

fn config(retries: usize) -> RunnerConfig {
    RunnerConfig {
        task_timeout: Duration::from_secs(10),
        api_retries: retries,
    }
}

#[tokio::test]
async fn api_source_completes_and_reports_progress() {
    let body = r#"{"subdomains": ["x.example.com", "evil.org", "not a domain"]}"#;
    let (addr, _, _) = spawn_server(vec![(200, body.to_string())]).await;
    let descriptor = api_descriptor("mock", addr, parse_subdomains);
    let sink = Arc::new(RecordingSink::new());

    let result = run_source(
        &descriptor,
        "example.com",
        &Client::new(),
        &config(3),
        sink.clone(),
    )
    .await;

    assert_eq!(result.status, SourceStatus::Completed);
    // syntactic validation only; scope filtering is the orchestrator's job
    let expected: HashSet<String> = ["x.example.com", "evil.org"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(result.subdomains, expected);

    let events = sink.events.lock().unwrap();
    assert_eq!(
        events.first(),
        Some(&("mock".to_string(), 0, Some(SourceStatus::Running)))
    );
    assert_eq!(
        events.last(),
        Some(&("mock".to_string(), 2, Some(SourceStatus::Completed)))
    );
}

#[tokio::test]
async fn api_retries_with_backoff_until_success() {
    let body = r#"{"subdomains": ["x.example.com"]}"#;
    let (addr, hits, _) = spawn_server(vec![
        (500, "server error".to_string()),
        (500, "server error".to_string()),
        (200, body.to_string()),
    ])
    .await;
    let descriptor = api_descriptor("flaky", addr, parse_subdomains);

    let started = Instant::now();
    let result = run_source(
        &descriptor,
        "example.com",
        &Client::new(),
        &config(3),
        Arc::new(NullSink),
    )
    .await;

    assert_eq!(result.status, SourceStatus::Completed);
    assert_eq!(result.subdomains.len(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    // backoff slept 1s then 2s between the three attempts
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn api_persistent_errors_exhaust_the_retry_budget() {
    let (addr, hits, _) = spawn_server(vec![(500, "server error".to_string())]).await;
    let descriptor = api_descriptor("down", addr, parse_subdomains);

    let result = run_source(
        &descriptor,
        "example.com",
        &Client::new(),
        &config(3),
        Arc::new(NullSink),
    )
    .await;

    assert_eq!(result.status, SourceStatus::Failed);
    assert!(result.subdomains.is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn parse_contract_violations_are_retried_then_failed() {
    let (addr, hits, _) = spawn_server(vec![(200, r#"{"anything": true}"#.to_string())]).await;
    let descriptor = api_descriptor("liar", addr, reject_everything);
    let sink = Arc::new(RecordingSink::new());

    let result = run_source(
        &descriptor,
        "example.com",
        &Client::new(),
        &config(3),
        sink.clone(),
    )
    .await;

    assert_eq!(result.status, SourceStatus::Failed);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    let events = sink.events.lock().unwrap();
    assert_eq!(
        events.last(),
        Some(&("liar".to_string(), 0, Some(SourceStatus::Failed)))
    );
}

#[tokio::test]
async fn undecodable_json_counts_as_a_failed_attempt() {
    let (addr, hits, _) = spawn_server(vec![(200, "certainly not json".to_string())]).await;
    let descriptor = api_descriptor("garbled", addr, parse_subdomains);

    let result = run_source(
        &descriptor,
        "example.com",
        &Client::new(),
        &config(1),
        Arc::new(NullSink),
    )
    .await;

    assert_eq!(result.status, SourceStatus::Failed);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn literal_auth_header_is_sent_verbatim() {
    let body = r#"{"subdomains": []}"#;
    let (addr, _, first_request) = spawn_server(vec![(200, body.to_string())]).await;
    let mut descriptor = api_descriptor("authed", addr, parse_subdomains);
    if let SourceKind::Api { auth, .. } = &mut descriptor.kind {
        *auth = Some(ApiAuth::Header("token sekrit".to_string()));
    }

    let result = run_source(
        &descriptor,
        "example.com",
        &Client::new(),
        &config(1),
        Arc::new(NullSink),
    )
    .await;

    assert_eq!(result.status, SourceStatus::Completed);
    let request = first_request.lock().unwrap();
    assert!(request.contains("authorization: token sekrit"));
    assert!(request.contains("user-agent: subsweep/"));
}

#[tokio::test]
async fn env_bearer_auth_is_omitted_when_unset() {
    let body = r#"{"subdomains": []}"#;
    let (addr, _, first_request) = spawn_server(vec![(200, body.to_string())]).await;
    let mut descriptor = api_descriptor("keyless", addr, parse_subdomains);
    if let SourceKind::Api { auth, .. } = &mut descriptor.kind {
        *auth = Some(ApiAuth::EnvBearer(
            "SUBSWEEP_TEST_UNSET_KEY_7F3A".to_string(),
        ));
    }

    let result = run_source(
        &descriptor,
        "example.com",
        &Client::new(),
        &config(1),
        Arc::new(NullSink),
    )
    .await;

    assert_eq!(result.status, SourceStatus::Completed);
    let request = first_request.lock().unwrap();
    assert!(!request.to_lowercase().contains("authorization"));
}

fn scenario_tool_command(_domain: &str) -> Vec<String> {
    vec![
        "printf".to_string(),
        "a.example.com\\nb.example.com\\n*.c.example.com\\n".to_string(),
    ]
}

fn hanging_command(_domain: &str) -> Vec<String> {
    vec!["sleep".to_string(), "30".to_string()]
}

#[tokio::test]
async fn tool_and_api_results_merge_dedupe_and_stay_in_scope() {
    let body = r#"{"subdomains": ["b.example.com", "evil.org"]}"#;
    let (addr, _, _) = spawn_server(vec![(200, body.to_string())]).await;

    let mut sources: BTreeMap<String, Arc<SourceDescriptor>> = BTreeMap::new();
    sources.insert(
        "emitter".to_string(),
        Arc::new(SourceDescriptor::tool("emitter", scenario_tool_command)),
    );
    sources.insert(
        "mock-api".to_string(),
        Arc::new(api_descriptor("mock-api", addr, parse_subdomains)),
    );

    let config = ScanConfig {
        runner: config(3),
        max_subdomains: 0,
    };
    let report = scan_target(
        "example.com",
        &sources,
        &Client::new(),
        &config,
        Arc::new(NullSink),
    )
    .await;

    assert_eq!(
        report.subdomains,
        vec!["a.example.com", "b.example.com", "c.example.com"]
    );
    let total: usize = report.contributions.values().sum();
    assert_eq!(total, 3);
}

#[tokio::test]
async fn global_timeout_abandons_the_scan_promptly() {
    let mut sources: BTreeMap<String, Arc<SourceDescriptor>> = BTreeMap::new();
    sources.insert(
        "stuck".to_string(),
        Arc::new(SourceDescriptor::tool("stuck", hanging_command)),
    );

    let config = ScanConfig {
        runner: RunnerConfig {
            task_timeout: Duration::from_secs(60),
            api_retries: 3,
        },
        max_subdomains: 0,
    };

    let started = Instant::now();
    let outcome = tokio::time::timeout(
        Duration::from_millis(300),
        scan_target(
            "example.com",
            &sources,
            &Client::new(),
            &config,
            Arc::new(NullSink),
        ),
    )
    .await;

    assert!(outcome.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
}
