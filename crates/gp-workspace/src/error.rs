// error.rs — Error types for the workspace subsystem.

use std::path::PathBuf;
use thiserror::Error;

use crate::git::GitError;

/// Errors that can occur during workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Every removal attempt failed; the directory is still present.
    #[error("could not remove workspace {path} after {} attempt(s): {}", .attempts.len(), .attempts.join("; "))]
    RemovalFailed {
        path: PathBuf,
        attempts: Vec<String>,
    },

    /// Cloning the remote failed (auth, network, missing remote).
    #[error("clone failed: {0}")]
    CloneFailed(#[source] GitError),

    /// A git command inside the workspace failed.
    #[error(transparent)]
    Git(#[from] GitError),

    /// A path tried to escape the workspace.
    #[error("path traversal detected: '{path}' resolves outside the workspace")]
    PathTraversal { path: String },

    /// A path is not an acceptable change-set target.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// A change set with no files.
    #[error("change set is empty")]
    EmptyChangeSet,

    /// A guard from a different workspace was presented.
    #[error("workspace guard does not belong to {path}")]
    ForeignGuard { path: PathBuf },
}

impl WorkspaceError {
    /// Whether re-issuing the whole request could succeed without changes
    /// to the change set itself.
    pub fn retry_safe(&self) -> bool {
        match self {
            WorkspaceError::IoError { .. }
            | WorkspaceError::RemovalFailed { .. }
            | WorkspaceError::CloneFailed(_)
            | WorkspaceError::Git(_) => true,
            WorkspaceError::PathTraversal { .. }
            | WorkspaceError::InvalidPath { .. }
            | WorkspaceError::EmptyChangeSet
            | WorkspaceError::ForeignGuard { .. } => false,
        }
    }
}
