use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl SourceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
        };
        f.write_str(label)
    }
}

/// Injected collaborator receiving per-source lifecycle callbacks. The
/// engine only ever calls `update`; rendering is the implementor's problem.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn update(&self, source: &str, count_increment: usize, status: Option<SourceStatus>);
}

/// Sink that swallows every event; used with --no-progress and in tests.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn update(&self, _source: &str, _count_increment: usize, _status: Option<SourceStatus>) {}
}

struct SourceLine {
    bar: ProgressBar,
    count: u64,
    status: SourceStatus,
}

/// One spinner line per source on stderr.
pub struct ConsoleSink {
    lines: Mutex<HashMap<String, SourceLine>>,
}

impl ConsoleSink {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        let multi = MultiProgress::new();
        let style = ProgressStyle::with_template("{spinner:.blue} {msg}").unwrap();
        let mut lines = HashMap::new();
        for name in names {
            let bar = multi.add(ProgressBar::new_spinner());
            bar.set_style(style.clone());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar.set_message(format!("{name}: 0 [PENDING]"));
            lines.insert(
                name,
                SourceLine {
                    bar,
                    count: 0,
                    status: SourceStatus::Pending,
                },
            );
        }
        Self {
            lines: Mutex::new(lines),
        }
    }
}

#[async_trait]
impl ProgressSink for ConsoleSink {
    async fn update(&self, source: &str, count_increment: usize, status: Option<SourceStatus>) {
        let mut lines = self.lines.lock().await;
        let Some(line) = lines.get_mut(source) else {
            return;
        };
        if line.status.is_terminal() {
            return;
        }
        line.count += count_increment as u64;
        if let Some(status) = status {
            line.status = status;
        }
        let message = format!("{source}: {} [{}]", line.count, line.status);
        if line.status.is_terminal() {
            line.bar.finish_with_message(message);
        } else {
            line.bar.set_message(message);
        }
    }
}
