//! Local checkpoint commits and their rollback.
//!
//! A checkpoint is a commit in the workspace clone that is never pushed by
//! itself. It also snapshots the bytes of every changed path, because the
//! clone it lives in is thrown away by the next reset.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use gp_workflow::{Annotation, ChangedPaths, Checkpoint, FileSnapshot, RollbackKind, Stage};
use gp_workspace::{GitError, WorkspaceError, WorkspaceGuard, WorkspaceManager};

use crate::config::CommitConfig;
use crate::git::GitAdapter;
use crate::marker::{render_commit_message, CommitAnnotation};

const CHECKPOINT_NOTE: &str = "Status: local checkpoint, awaiting approval to publish";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Git(#[from] GitError),

    /// Staging found no net change; the apply step wrote nothing new.
    #[error("nothing to checkpoint: the change set produced no diff")]
    NothingToCheckpoint,

    /// The workspace holds modifications outside the change set.
    #[error("workspace has changes outside the change set: {}", .paths.join(", "))]
    UnrelatedDrift { paths: Vec<String> },

    #[error("failed to encode commit annotation: {0}")]
    Annotation(#[from] serde_json::Error),
}

impl CheckpointError {
    pub fn stage(&self) -> Stage {
        Stage::Checkpoint
    }

    pub fn retry_safe(&self) -> bool {
        match self {
            CheckpointError::Workspace(e) => e.retry_safe(),
            CheckpointError::Git(_) => true,
            CheckpointError::NothingToCheckpoint
            | CheckpointError::UnrelatedDrift { .. }
            | CheckpointError::Annotation(_) => false,
        }
    }
}

/// What a rollback actually did to the workspace.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub kind: RollbackKind,

    /// False when the workspace no longer held the checkpoint.
    pub workspace_touched: bool,

    /// Paths put back to their pre-checkpoint contents (hard only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restored: Vec<String>,

    /// Paths the checkpoint introduced and a hard rollback deleted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

pub struct CheckpointCoordinator {
    manager: Arc<WorkspaceManager>,
    commit: CommitConfig,
}

impl CheckpointCoordinator {
    pub fn new(manager: Arc<WorkspaceManager>, commit: CommitConfig) -> Self {
        Self { manager, commit }
    }

    fn adapter(&self, guard: &WorkspaceGuard<'_>) -> Result<GitAdapter, WorkspaceError> {
        Ok(GitAdapter::new(self.manager.git(guard)?, self.commit.clone()))
    }

    /// Commit exactly `changed_paths` as a local checkpoint.
    pub fn checkpoint(
        &self,
        guard: &WorkspaceGuard<'_>,
        workflow_id: &str,
        changed_paths: &ChangedPaths,
        annotation: &Annotation,
    ) -> Result<Checkpoint, CheckpointError> {
        let adapter = self.adapter(guard)?;
        let base_ref = adapter.head()?;

        let drift: Vec<String> = adapter
            .changed_paths_on_disk()?
            .into_iter()
            .filter(|p| !changed_paths.contains(p))
            .collect();
        if !drift.is_empty() {
            return Err(CheckpointError::UnrelatedDrift { paths: drift });
        }
        if changed_paths.is_empty() {
            return Err(CheckpointError::NothingToCheckpoint);
        }

        adapter.stage(changed_paths.as_slice())?;
        if !adapter.has_staged_changes()? {
            return Err(CheckpointError::NothingToCheckpoint);
        }

        let mut files = Vec::with_capacity(changed_paths.len());
        for path in changed_paths.iter() {
            files.push(FileSnapshot::new(path, self.manager.read_file(guard, path)?));
        }

        let commit_annotation = CommitAnnotation::new(workflow_id, annotation, changed_paths);
        let message = render_commit_message(&commit_annotation, Some(CHECKPOINT_NOTE))?;
        let checkpoint_ref = adapter.commit(&message)?;

        tracing::info!(
            workflow_id = %workflow_id,
            checkpoint_ref = %checkpoint_ref,
            files = files.len(),
            "local checkpoint created"
        );

        Ok(Checkpoint {
            checkpoint_ref,
            base_ref,
            created_at: Utc::now(),
            annotation: annotation.clone(),
            files,
        })
    }

    /// Undo a checkpoint commit.
    ///
    /// Soft leaves the changed files in place, unstaged. Hard also puts
    /// every path in `changed_paths` back to its state at `base_ref` and
    /// touches nothing else. If the workspace HEAD is no longer the
    /// checkpoint (another request has reset it since), nothing on disk is
    /// changed.
    pub fn rollback(
        &self,
        guard: &WorkspaceGuard<'_>,
        checkpoint: &Checkpoint,
        changed_paths: &ChangedPaths,
        kind: RollbackKind,
    ) -> Result<RollbackOutcome, CheckpointError> {
        let mut outcome = RollbackOutcome {
            kind,
            workspace_touched: false,
            restored: Vec::new(),
            removed: Vec::new(),
        };

        let adapter = self.adapter(guard)?;
        let head = adapter.head().ok();
        if head.as_deref() != Some(checkpoint.checkpoint_ref.as_str()) {
            tracing::warn!(
                checkpoint_ref = %checkpoint.checkpoint_ref,
                head = head.as_deref().unwrap_or("<none>"),
                "workspace no longer holds the checkpoint; rollback is bookkeeping only"
            );
            return Ok(outcome);
        }

        adapter.reset_to_parent()?;
        outcome.workspace_touched = true;

        if kind == RollbackKind::Hard {
            for path in changed_paths.iter() {
                if adapter.exists_in_head(path)? {
                    adapter.checkout_from_head(path)?;
                    outcome.restored.push(path.to_string());
                } else {
                    remove_introduced(guard.path(), path)?;
                    outcome.removed.push(path.to_string());
                }
            }
        }

        tracing::info!(
            checkpoint_ref = %checkpoint.checkpoint_ref,
            kind = ?kind,
            restored = outcome.restored.len(),
            removed = outcome.removed.len(),
            "checkpoint rolled back"
        );
        Ok(outcome)
    }
}

/// Delete a file the checkpoint added, then any directories it left empty.
fn remove_introduced(root: &Path, relative: &str) -> Result<(), WorkspaceError> {
    let full = root.join(relative);
    match fs::remove_file(&full) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => return Err(WorkspaceError::IoError { path: full, source }),
    }

    let mut dir = full.parent();
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) || fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
    Ok(())
}
