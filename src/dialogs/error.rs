//! Error types for the dialog stack machine.

use crate::turn::TurnError;
use thiserror::Error;

/// Errors that can occur while driving the dialog stack.
#[derive(Debug, Error)]
pub enum DialogError {
    /// A dialog id argument was empty.
    #[error("dialog id must not be empty")]
    EmptyDialogId,

    /// `begin_dialog` was asked for an id the dialog set does not contain.
    #[error("dialog '{0}' is not registered in the dialog set")]
    NotRegistered(String),

    /// A dialog with the same id was already added to the set.
    #[error("a dialog with id '{0}' is already registered")]
    DuplicateId(String),

    /// A persisted stack refers to a dialog that no longer exists anywhere
    /// in the container hierarchy. Fatal for the turn; there is no silent
    /// continuation against a missing dialog.
    #[error("cannot continue dialog '{0}': it no longer exists in the container hierarchy")]
    MissingDialog(String),

    /// The persisted dialog state is malformed or inconsistent.
    #[error("dialog state error: {0}")]
    State(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A turn operation performed by a dialog failed.
    #[error(transparent)]
    Turn(#[from] TurnError),
}
