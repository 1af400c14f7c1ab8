// error.rs — Error types for the workflow lifecycle subsystem.

use thiserror::Error;

use crate::workflow::Stage;

/// Errors that can occur during workflow lifecycle operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize an event or record.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The requested workflow was not found.
    #[error("workflow not found: {0}")]
    NotFound(String),

    /// A workflow with this id is already registered.
    #[error("workflow already exists: {0}")]
    Duplicate(String),

    /// Invalid state transition.
    #[error("invalid transition from {from} to {to} for workflow {workflow_id}")]
    InvalidTransition {
        workflow_id: String,
        from: String,
        to: String,
        /// Stage that was asked to make the transition.
        stage: Stage,
    },

    /// The workflow already reached a terminal state.
    #[error("workflow {workflow_id} already resolved ({state})")]
    AlreadyResolved { workflow_id: String, state: String },

    /// A notification dispatch failed (non-fatal).
    #[error("notification error: {0}")]
    NotificationError(String),
}
