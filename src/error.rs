//! Error taxonomy shared by every client component

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// A source tree or staging file could not be packaged
    #[error("failed to package {}: {source}", path.display())]
    Packaging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The queue refused a task submission (never retried)
    #[error("submission rejected with HTTP {status}: {body}")]
    SubmissionRejected { status: u16, body: String },

    #[error("unauthorized request to {url}")]
    Unauthorized { url: String },

    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },

    #[error("timed out after {waited:?} waiting for {what} (last observed: {})", last_observed.as_deref().unwrap_or("nothing"))]
    Timeout {
        what: String,
        waited: Duration,
        last_observed: Option<String>,
    },

    /// Result artifact without a readable `correction.yml` verdict
    #[error("malformed result artifact: {0}")]
    MalformedResult(String),

    #[error("could not extract verdict from filename: {0}")]
    InvalidVerdictFilename(String),

    #[error("unexpected HTTP {status} from {url}: {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl QueueError {
    pub(crate) fn packaging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        QueueError::Packaging {
            path: path.into(),
            source,
        }
    }

    /// Whether a failed idempotent read may be retried by a polling loop.
    ///
    /// Credentials problems and local failures are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Http(_) | QueueError::NotFound { .. } => true,
            QueueError::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
