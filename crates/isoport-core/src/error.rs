use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Message used when a worker leaves the handoff slot empty or unreadable.
pub const NO_RESULT_MESSAGE: &str = "worker exited without producing a result";

/// Failure to obtain the bytes a job refers to.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("GET {url} returned HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("GET {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("request carries neither inline data nor a url")]
    Empty,
}

/// Why a dispatched call did not produce a payload.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to start worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("worker i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode job: {0}")]
    Encode(#[from] serde_json::Error),

    /// The worker reported an error through the handoff slot.
    #[error("{message}")]
    Worker { message: String },

    /// The worker finished (or died) without writing the slot.
    #[error("{}", NO_RESULT_MESSAGE)]
    NoResult,

    #[error("worker timed out after {0:?}")]
    Timeout(Duration),

    #[error("dispatch cancelled")]
    Cancelled,
}

impl DispatchError {
    /// True when the failure came from the job itself rather than the
    /// machinery around it.
    pub fn is_worker_reported(&self) -> bool {
        matches!(self, DispatchError::Worker { .. })
    }
}
