//! Error types for turn processing.

use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur while processing a turn.
///
/// Cancellation is modeled as an error variant so it can flow through the
/// same chains as application errors, but it is never routed to the
/// adapter's turn-error handler; use [`TurnError::is_cancellation`] to keep
/// shutdown and timeout signals out of recovery paths.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The turn's cancellation token fired. Always rethrown, never recovered.
    #[error("the turn was cancelled")]
    Cancelled,

    /// A required argument was missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The channel does not support the requested operation, such as
    /// updating or deleting an activity.
    #[error("operation not supported by the channel: {0}")]
    NotSupported(String),

    /// The channel transport rejected or failed the call.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading or writing turn-scoped state failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error during turn processing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic error raised by application middleware or handlers.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TurnError {
    /// True when this error represents cooperative cancellation rather than
    /// an application failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TurnError::Cancelled)
    }
}
