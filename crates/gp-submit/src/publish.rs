//! Replay an approved checkpoint onto the current remote tip and push it.
//!
//! The checkpoint commit itself is never pushed. The remote may have moved
//! since the checkpoint was taken, so publish always starts from a fresh
//! clone and re-materializes the recorded file contents on top of it.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use gp_workflow::{PublishRecord, Stage, Workflow};
use gp_workspace::{GitError, WorkspaceError, WorkspaceGuard, WorkspaceManager};

use crate::config::CommitConfig;
use crate::git::{GitAdapter, PushRejection};
use crate::marker::{render_commit_message, CommitAnnotation};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("workflow {workflow_id} has no checkpoint to publish")]
    NoCheckpoint { workflow_id: String },

    /// The fresh tip already contains exactly these contents.
    #[error("nothing to publish: the remote tip already matches the checkpoint")]
    NoChangesToPublish,

    /// The remote refused the push. `detail` is git's redacted output.
    #[error("push rejected ({kind}): {detail}")]
    Push { kind: PushRejection, detail: String },

    #[error("failed to encode commit annotation: {0}")]
    Annotation(#[from] serde_json::Error),
}

impl PublishError {
    pub fn stage(&self) -> Stage {
        match self {
            PublishError::Workspace(WorkspaceError::RemovalFailed { .. })
            | PublishError::Workspace(WorkspaceError::CloneFailed(_)) => Stage::Reset,
            _ => Stage::Publish,
        }
    }

    pub fn retry_safe(&self) -> bool {
        match self {
            PublishError::Workspace(e) => e.retry_safe(),
            PublishError::Git(_) => true,
            PublishError::Push { kind, .. } => kind.retry_safe(),
            PublishError::NoCheckpoint { .. }
            | PublishError::NoChangesToPublish
            | PublishError::Annotation(_) => false,
        }
    }
}

pub struct PublishCoordinator {
    manager: Arc<WorkspaceManager>,
    commit: CommitConfig,
}

impl PublishCoordinator {
    pub fn new(manager: Arc<WorkspaceManager>, commit: CommitConfig) -> Self {
        Self { manager, commit }
    }

    /// Reset, replay, commit, push. One push attempt; no retry.
    pub fn publish(
        &self,
        guard: &WorkspaceGuard<'_>,
        workflow: &Workflow,
    ) -> Result<PublishRecord, PublishError> {
        let checkpoint = workflow
            .checkpoint
            .as_ref()
            .ok_or_else(|| PublishError::NoCheckpoint {
                workflow_id: workflow.id.clone(),
            })?;
        if checkpoint.files.is_empty() {
            return Err(PublishError::NoChangesToPublish);
        }

        self.manager.reset(guard)?;
        let changed = self.manager.apply_files(
            guard,
            checkpoint
                .files
                .iter()
                .map(|f| (f.path.as_str(), f.content.as_slice())),
        )?;

        let adapter = GitAdapter::new(self.manager.git(guard)?, self.commit.clone());
        adapter.stage(changed.as_slice())?;
        if !adapter.has_staged_changes()? {
            return Err(PublishError::NoChangesToPublish);
        }

        let annotation = CommitAnnotation::new(&workflow.id, &checkpoint.annotation, &changed);
        let message = render_commit_message(&annotation, None)?;
        let remote_ref = adapter.commit(&message)?;

        let branch = &self.manager.remote().branch;
        if let Err(err) = adapter.push(branch) {
            let kind = PushRejection::classify(&err);
            tracing::warn!(
                workflow_id = %workflow.id,
                kind = %kind,
                "publish push rejected"
            );
            return Err(PublishError::Push {
                kind,
                detail: PushRejection::detail(&err),
            });
        }

        tracing::info!(
            workflow_id = %workflow.id,
            remote_ref = %remote_ref,
            branch = %branch,
            "checkpoint published"
        );
        Ok(PublishRecord {
            remote_ref,
            pushed_at: Utc::now(),
            source_checkpoint_ref: checkpoint.checkpoint_ref.clone(),
            workflow_id: Some(workflow.id.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_errors_follow_rejection_kind() {
        let nff = PublishError::Push {
            kind: PushRejection::NonFastForward,
            detail: "[rejected]".to_string(),
        };
        assert!(!nff.retry_safe());
        assert_eq!(nff.stage(), Stage::Publish);

        let net = PublishError::Push {
            kind: PushRejection::Network,
            detail: String::new(),
        };
        assert!(net.retry_safe());
        assert!(!PublishError::NoChangesToPublish.retry_safe());
    }

    #[test]
    fn reset_failures_are_attributed_to_reset() {
        let err = PublishError::Workspace(WorkspaceError::RemovalFailed {
            path: "/tmp/ws".into(),
            attempts: vec!["remove_dir_all: busy".to_string()],
        });
        assert_eq!(err.stage(), Stage::Reset);
        assert!(err.retry_safe());
    }
}
