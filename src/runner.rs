use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client};
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use crate::constants::USER_AGENT;
use crate::errors::SourceError;
use crate::progress::{ProgressSink, SourceStatus};
use crate::registry::{ApiAuth, ApiParser, CommandBuilder, Payload, SourceDescriptor, SourceKind};
use crate::validator::{is_valid, normalize};

/// Outcome of one source executed against one target.
#[derive(Debug)]
pub struct SourceResult {
    pub subdomains: HashSet<String>,
    pub status: SourceStatus,
}

impl SourceResult {
    fn completed(subdomains: HashSet<String>) -> Self {
        Self {
            subdomains,
            status: SourceStatus::Completed,
        }
    }

    fn failed() -> Self {
        Self {
            subdomains: HashSet::new(),
            status: SourceStatus::Failed,
        }
    }

    fn timed_out() -> Self {
        Self {
            subdomains: HashSet::new(),
            status: SourceStatus::Timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Bounds one tool run, and each individual API attempt.
    pub task_timeout: Duration,
    /// Attempt budget for API sources; tools are never retried.
    pub api_retries: usize,
}

/// Execute one source against one target. Every failure mode is folded into
/// the terminal status; this never returns an error to the orchestrator.
pub async fn run_source(
    descriptor: &SourceDescriptor,
    target: &str,
    client: &Client,
    config: &RunnerConfig,
    sink: Arc<dyn ProgressSink>,
) -> SourceResult {
    sink.update(&descriptor.name, 0, Some(SourceStatus::Running))
        .await;
    let result = match &descriptor.kind {
        SourceKind::Tool { build_command } => {
            run_tool(&descriptor.name, *build_command, target, config.task_timeout).await
        }
        SourceKind::Api {
            url_template,
            parser,
            json,
            auth,
        } => {
            run_api(
                &descriptor.name,
                url_template,
                *parser,
                *json,
                auth.as_ref(),
                target,
                client,
                config,
            )
            .await
        }
    };
    sink.update(&descriptor.name, result.subdomains.len(), Some(result.status))
        .await;
    result
}

async fn run_tool(
    name: &str,
    build_command: CommandBuilder,
    target: &str,
    task_timeout: Duration,
) -> SourceResult {
    let argv = build_command(target);
    let Some((program, args)) = argv.split_first() else {
        error!("[{name}] command builder produced an empty argv");
        return SourceResult::failed();
    };

    let child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!("[{name}] could not launch '{program}': {e}");
            return SourceResult::failed();
        }
    };

    // dropping the in-flight wait future on timeout kills the child
    let output = match timeout(task_timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            error!("[{name}] subprocess I/O failed: {e}");
            return SourceResult::failed();
        }
        Err(_) => {
            warn!("[{name}] timed out after {}s", task_timeout.as_secs());
            return SourceResult::timed_out();
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("[{name}] exited with {}: {}", output.status, stderr.trim());
        return SourceResult::failed();
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let subdomains = stdout
        .lines()
        .map(normalize)
        .filter(|line| is_valid(line))
        .collect();
    SourceResult::completed(subdomains)
}

#[allow(clippy::too_many_arguments)]
async fn run_api(
    name: &str,
    url_template: &str,
    parser: ApiParser,
    json: bool,
    auth: Option<&ApiAuth>,
    target: &str,
    client: &Client,
    config: &RunnerConfig,
) -> SourceResult {
    let url = url_template.replace("{domain}", target);
    for attempt in 0..config.api_retries {
        if attempt > 0 {
            sleep(Duration::from_secs(1 << (attempt - 1))).await;
        }
        match api_attempt(&url, parser, json, auth, client, config.task_timeout).await {
            Ok(subdomains) => return SourceResult::completed(subdomains),
            Err(e) if attempt + 1 < config.api_retries => {
                debug!(
                    "[{name}] attempt {}/{} failed: {e}, retrying",
                    attempt + 1,
                    config.api_retries
                );
            }
            Err(e) => {
                error!("[{name}] failed after {} attempts: {e}", config.api_retries);
            }
        }
    }
    SourceResult::failed()
}

async fn api_attempt(
    url: &str,
    parser: ApiParser,
    json: bool,
    auth: Option<&ApiAuth>,
    client: &Client,
    task_timeout: Duration,
) -> Result<HashSet<String>, SourceError> {
    let mut request = client
        .get(url)
        .header(header::USER_AGENT, USER_AGENT)
        .timeout(task_timeout);
    match auth {
        Some(ApiAuth::EnvBearer(var)) => {
            if let Ok(key) = std::env::var(var) {
                request = request.header(header::AUTHORIZATION, format!("Bearer {key}"));
            }
        }
        Some(ApiAuth::Header(value)) => {
            request = request.header(header::AUTHORIZATION, value.as_str());
        }
        None => {}
    }

    let response = request.send().await?;
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(SourceError::Status(status));
    }

    let body = response.text().await?;
    let payload = if json {
        Payload::Json(serde_json::from_str(&body)?)
    } else {
        Payload::Text(body)
    };

    // parsers may chew on megabytes of JSON; keep them off the scheduler
    let parsed = tokio::task::spawn_blocking(move || parser(payload))
        .await
        .map_err(|_| SourceError::Worker)??;

    Ok(parsed
        .iter()
        .map(|candidate| normalize(candidate))
        .filter(|candidate| is_valid(candidate))
        .collect())
}
