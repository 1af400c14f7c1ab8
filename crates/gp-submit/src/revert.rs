//! Undo the most recent published commit with an inverse commit.
//!
//! Only the exact commit we pushed last may be reverted, and only while it
//! is still the remote tip. History is never rewritten.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use gp_workflow::{PublishRecord, Stage};
use gp_workspace::{GitError, WorkspaceError, WorkspaceGuard, WorkspaceManager};

use crate::config::CommitConfig;
use crate::git::{GitAdapter, PushRejection};
use crate::marker::{is_system_authored, render_revert_message};

/// Why the remote tip cannot be reverted automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotRevertableReason {
    /// Someone pushed after our last publish.
    TipMoved { expected: String, actual: String },

    /// The tip lacks the system-authored marker.
    NotSystemAuthored { tip: String },
}

impl fmt::Display for NotRevertableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotRevertableReason::TipMoved { expected, actual } => write!(
                f,
                "remote tip moved from last publish {} to {}",
                expected, actual
            ),
            NotRevertableReason::NotSystemAuthored { tip } => {
                write!(f, "remote tip {} is not system-authored", tip)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum RevertError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("no publish has been recorded in this process")]
    NoPublishRecorded,

    #[error("not revertable: {reason}")]
    NotRevertable { reason: NotRevertableReason },

    /// The inverse of the tip is empty.
    #[error("nothing to revert: commit {remote_ref} has no changes")]
    NothingToRevert { remote_ref: String },

    #[error("revert push rejected ({kind}): {detail}")]
    Push { kind: PushRejection, detail: String },
}

impl RevertError {
    pub fn stage(&self) -> Stage {
        match self {
            RevertError::Workspace(WorkspaceError::RemovalFailed { .. })
            | RevertError::Workspace(WorkspaceError::CloneFailed(_)) => Stage::Reset,
            _ => Stage::Revert,
        }
    }

    pub fn retry_safe(&self) -> bool {
        match self {
            RevertError::Workspace(e) => e.retry_safe(),
            RevertError::Git(_) => true,
            RevertError::Push { kind, .. } => kind.retry_safe(),
            RevertError::NoPublishRecorded
            | RevertError::NotRevertable { .. }
            | RevertError::NothingToRevert { .. } => false,
        }
    }
}

pub struct RevertCoordinator {
    manager: Arc<WorkspaceManager>,
    commit: CommitConfig,
}

impl RevertCoordinator {
    pub fn new(manager: Arc<WorkspaceManager>, commit: CommitConfig) -> Self {
        Self { manager, commit }
    }

    /// Revert `last` on the remote. Returns the record of the revert commit.
    ///
    /// Clearing the caller's last-publish pointer is left to the caller, and
    /// must only happen when this returns `Ok`.
    pub fn revert(
        &self,
        guard: &WorkspaceGuard<'_>,
        last: &PublishRecord,
    ) -> Result<PublishRecord, RevertError> {
        self.manager.reset(guard)?;
        let adapter = GitAdapter::new(self.manager.git(guard)?, self.commit.clone());

        let tip = adapter.head()?;
        if tip != last.remote_ref {
            return Err(RevertError::NotRevertable {
                reason: NotRevertableReason::TipMoved {
                    expected: last.remote_ref.clone(),
                    actual: tip,
                },
            });
        }
        if !is_system_authored(&adapter.head_message()?) {
            return Err(RevertError::NotRevertable {
                reason: NotRevertableReason::NotSystemAuthored { tip },
            });
        }

        let subject = adapter.head_subject()?;
        adapter.revert_head_no_commit()?;
        if !adapter.has_staged_changes()? {
            return Err(RevertError::NothingToRevert { remote_ref: tip });
        }
        let revert_ref = adapter.commit(&render_revert_message(&tip, &subject))?;

        if let Err(err) = adapter.push(&self.manager.remote().branch) {
            let kind = PushRejection::classify(&err);
            tracing::warn!(reverted = %tip, kind = %kind, "revert push rejected");
            return Err(RevertError::Push {
                kind,
                detail: PushRejection::detail(&err),
            });
        }

        tracing::info!(reverted = %tip, revert_ref = %revert_ref, "last publish reverted");
        Ok(PublishRecord {
            remote_ref: revert_ref,
            pushed_at: Utc::now(),
            source_checkpoint_ref: tip,
            workflow_id: last.workflow_id.clone(),
        })
    }
}
