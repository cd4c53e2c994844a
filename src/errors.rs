use std::path::PathBuf;

use thiserror::Error;

/// Fatal driver-level errors; each one terminates the run with a non-zero
/// exit code.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not read input file {}: {1}", .0.display())]
    InputFile(PathBuf, #[source] std::io::Error),

    #[error("no valid target domains to scan")]
    NoTargets,

    #[error("no usable sources left after gating")]
    NoSources,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failure of a single source attempt. Never escapes the runner; it is
/// folded into a terminal `SourceStatus` after the retry budget is spent.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected payload shape: {0}")]
    Shape(&'static str),

    #[error("parse worker aborted")]
    Worker,
}
