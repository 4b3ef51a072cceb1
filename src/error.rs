use std::sync::Arc;

use thiserror::Error;

use crate::Operation;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the client, the worker and the bundled host adapters.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Arguments could not be turned into a dispatch bundle. Nothing was submitted.
    #[error("arguments cannot be serialized into a dispatch bundle")]
    Serialization(#[source] Arc<serde_json::Error>),

    /// A bundle handed to the worker does not match the shape its operation expects.
    #[error("invalid dispatch bundle for {operation}")]
    InvalidBundle {
        /// Operation the bundle was submitted for.
        operation: Operation,
        /// Deserialization failure.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The worker returned a value the client cannot interpret for this read.
    #[error("unexpected result for {operation}")]
    InvalidResult {
        /// Operation that produced the value.
        operation: Operation,
        /// Deserialization failure.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The configured host is not a valid base URL.
    #[error("invalid host configuration")]
    InvalidHost(#[source] url::ParseError),

    /// The backend rejected the API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// The backend answered with a non-success status.
    #[error("backend responded with status {status}")]
    Backend {
        /// HTTP status code.
        status: u16,
    },

    /// Transport-level failure talking to the backend.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// The host refused to accept a deferred submission.
    #[error("scheduler rejected submission: {0}")]
    Scheduler(String),

    /// The queue scheduler has been stopped and no longer accepts work.
    #[error("worker has been stopped")]
    WorkerStopped,

    /// The background worker thread panicked.
    #[error("worker thread panicked")]
    WorkerThreadPanicked,

    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    /// An I/O error.
    #[error(transparent)]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Serialization(Arc::new(value))
    }
}
