use std::sync::Arc;

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the storage layer.
///
/// Engine operations never return these: they are logged and the affected operation degrades
/// (a failed read is treated as "nothing stored", a failed write is skipped).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Stored record is not valid JSON or does not have the expected shape.
    #[error("corrupt stored record")]
    Json(#[source] Arc<serde_json::Error>),

    /// Storage backend is disabled or otherwise unusable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(Arc::new(value))
    }
}

/// Reasons a strategy could not produce a bucket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StrategyError {
    /// Deterministic bucketing was requested without an identity.
    #[error("crc32 strategy requires an identity")]
    MissingIdentity,

    /// Custom strategy returned an id that is not one of the experiment's groups.
    #[error("custom strategy returned invalid group id {0}")]
    InvalidGroup(i64),

    /// Custom strategy reported a failure.
    #[error("custom strategy failed: {0}")]
    Failed(String),

    /// Custom strategy panicked.
    #[error("custom strategy panicked: {0}")]
    Panicked(String),
}

impl StrategyError {
    /// Shorthand for [`StrategyError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
