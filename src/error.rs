//! Error types for the topology editor.
//!
//! Every fallible operation in the crate returns [`TopologyError`]. The first
//! seven variants form the editor's error taxonomy; the rest wrap the errors of
//! the crates underneath so `?` converts them automatically.

use thiserror::Error;

/// Custom error type for topology editor operations.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The store was used before `initialize` succeeded (or after teardown).
    #[error("state not initialized")]
    NotInitialized,

    /// Unknown device, connection, pin or project id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A layer name outside physical/logical/application/cip.
    #[error("invalid layer: {0}")]
    InvalidLayer(String),

    /// Missing field, self-connection, duplicate connection, bad coordinate,
    /// out-of-enum type and similar input problems.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A connection references a device that is not part of the graph being
    /// reconstructed.
    #[error("connection {connection} references missing device {device}")]
    DanglingReference { connection: String, device: String },

    /// A network operation kept timing out after every retry.
    #[error("request timeout after {attempts} attempts: {endpoint}")]
    Timeout { endpoint: String, attempts: u32 },

    /// The backend returned something that is not the expected JSON shape.
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    /// The backend answered with a non-success status.
    #[error("{message} (status {status})")]
    Backend { status: u16, message: String },

    /// Error reading or writing project files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing JSON data.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Error making HTTP requests.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Error from the refresh scheduler.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
}

impl TopologyError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::ValidationFailed(reason.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = TopologyError> = std::result::Result<T, E>;
