// approval.rs — ApprovalGateway: the only place external decisions land.
//
// Decisions on one workflow are serialized by its slot, so a second
// approve waits for the first and then sees `published` and returns the
// same record. Different workflows only contend on the workspace lock,
// and only for the part of a decision that touches disk.
//
// Lock order: workflow slot, then workspace, then registry (brief).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use gp_submit::{
    CheckpointCoordinator, CommitHistory, CommitInfo, PublishCoordinator, RevertCoordinator,
    RevertError, RollbackOutcome,
};
use gp_workflow::{
    PipelineEvent, PublishRecord, RollbackKind, Stage, Workflow, WorkflowRegistry, WorkflowState,
};
use gp_workspace::WorkspaceManager;

use crate::error::GatewayError;
use crate::slots::WorkflowSlots;

/// An external decision on a workflow awaiting approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    RejectSoft,
    RejectHard,
}

/// What a decision did.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionOutcome {
    pub workflow: Workflow,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishRecord>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackOutcome>,
}

pub struct ApprovalGateway {
    registry: Arc<WorkflowRegistry>,
    manager: Arc<WorkspaceManager>,
    checkpoints: Arc<CheckpointCoordinator>,
    publisher: PublishCoordinator,
    reverter: RevertCoordinator,
    history: CommitHistory,
    slots: Arc<WorkflowSlots>,
    revert_gate: Mutex<()>,
}

impl ApprovalGateway {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        manager: Arc<WorkspaceManager>,
        checkpoints: Arc<CheckpointCoordinator>,
        publisher: PublishCoordinator,
        reverter: RevertCoordinator,
        slots: Arc<WorkflowSlots>,
    ) -> Self {
        Self {
            registry,
            history: CommitHistory::new(Arc::clone(&manager)),
            manager,
            checkpoints,
            publisher,
            reverter,
            slots,
            revert_gate: Mutex::new(()),
        }
    }

    pub fn decide(&self, id: &str, decision: Decision) -> Result<DecisionOutcome, GatewayError> {
        match decision {
            Decision::Approve => {
                let record = self.approve(id)?;
                Ok(DecisionOutcome {
                    workflow: self.registry.get(id)?,
                    publish: Some(record),
                    rollback: None,
                })
            }
            Decision::RejectSoft => self.reject_outcome(id, RollbackKind::Soft),
            Decision::RejectHard => self.reject_outcome(id, RollbackKind::Hard),
        }
    }

    /// Publish the workflow's checkpoint.
    ///
    /// Approving an already-published workflow returns its record without
    /// pushing again.
    pub fn approve(&self, id: &str) -> Result<PublishRecord, GatewayError> {
        self.slots.with(id, || self.approve_held(id))
    }

    fn approve_held(&self, id: &str) -> Result<PublishRecord, GatewayError> {
        let workflow = self.registry.get(id)?;
        if let (WorkflowState::Published, Some(record)) =
            (&workflow.state, &workflow.publish_result)
        {
            tracing::info!(workflow_id = %id, "already published; returning prior result");
            return Ok(record.clone());
        }
        workflow.ensure_can(&WorkflowState::Published)?;

        let guard = self.manager.workspace().lock();
        match self.publisher.publish(&guard, &workflow) {
            Ok(record) => {
                // Recorded before the workspace is released so a revert
                // never sees a pushed commit without its last-publish record.
                self.registry
                    .update(id, |wf| wf.mark_published(record.clone()))?;
                self.registry.record_publish(record.clone());
                drop(guard);
                self.registry
                    .dispatcher()
                    .dispatch(&PipelineEvent::published(id, &record));
                Ok(record)
            }
            Err(e) => {
                drop(guard);
                let reason = e.to_string();
                let retry_safe = e.retry_safe();
                tracing::warn!(workflow_id = %id, retry_safe, "publish failed: {}", reason);
                self.registry
                    .update(id, |wf| wf.fail(Stage::Publish, reason, retry_safe))?;
                Err(e.into())
            }
        }
    }

    /// Undo the local checkpoint and keep the files, unstaged.
    pub fn reject_soft(&self, id: &str) -> Result<RollbackOutcome, GatewayError> {
        self.reject(id, RollbackKind::Soft)
    }

    /// Undo the local checkpoint and restore exactly the changed paths.
    pub fn reject_hard(&self, id: &str) -> Result<RollbackOutcome, GatewayError> {
        self.reject(id, RollbackKind::Hard)
    }

    pub fn status(&self, id: &str) -> Result<Workflow, GatewayError> {
        Ok(self.registry.get(id)?)
    }

    pub fn last_publish(&self) -> Option<PublishRecord> {
        self.registry.last_publish()
    }

    /// Revert the most recent publish on the remote.
    pub fn revert_last_publish(&self) -> Result<PublishRecord, GatewayError> {
        let _gate = lock(&self.revert_gate);
        let guard = self.manager.workspace().lock();

        let last = self
            .registry
            .last_publish()
            .ok_or(RevertError::NoPublishRecorded)?;
        let revert = self.reverter.revert(&guard, &last)?;
        self.registry.clear_last_publish_if(&last.remote_ref);
        drop(guard);

        self.registry
            .dispatcher()
            .dispatch(&PipelineEvent::reverted(&last.remote_ref, &revert));
        Ok(revert)
    }

    /// Newest commits on the remote branch, pipeline commits flagged.
    /// What an approver looks at before reverting.
    pub fn recent_commits(&self, limit: usize) -> Result<Vec<CommitInfo>, GatewayError> {
        let guard = self.manager.workspace().lock();
        self.history
            .recent(&guard, limit)
            .map_err(|source| GatewayError::Workspace {
                stage: Stage::Reset,
                source,
            })
    }

    /// Remove an abandoned workflow. Refused while an intake run or a
    /// decision for it is in progress.
    pub fn discard(&self, id: &str) -> Result<Workflow, GatewayError> {
        let removed = self
            .slots
            .try_with(id, || self.registry.remove(id))
            .ok_or_else(|| GatewayError::DecisionInFlight {
                workflow_id: id.to_string(),
            })??;
        tracing::info!(workflow_id = %id, state = %removed.state, "workflow discarded");
        Ok(removed)
    }

    /// Workflows with a run or decision holding or waiting for their slot.
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    fn reject(&self, id: &str, kind: RollbackKind) -> Result<RollbackOutcome, GatewayError> {
        self.slots.with(id, || self.reject_held(id, kind))
    }

    fn reject_held(&self, id: &str, kind: RollbackKind) -> Result<RollbackOutcome, GatewayError> {
        let workflow = self.registry.get(id)?;
        let target = match kind {
            RollbackKind::Soft => WorkflowState::RolledBackSoft,
            RollbackKind::Hard => WorkflowState::RolledBackHard,
        };
        workflow.ensure_can(&target)?;
        // awaiting_decision always carries its checkpoint.
        let Some(checkpoint) = workflow.checkpoint.as_ref() else {
            return Err(gp_workflow::WorkflowError::InvalidTransition {
                workflow_id: id.to_string(),
                from: workflow.state.to_string(),
                to: target.to_string(),
                stage: Stage::Decision,
            }
            .into());
        };

        let guard = self.manager.workspace().lock();
        let result = self
            .checkpoints
            .rollback(&guard, checkpoint, &workflow.changed_paths, kind);
        drop(guard);

        match result {
            Ok(outcome) => {
                self.registry.update(id, |wf| wf.mark_rolled_back(kind))?;
                Ok(outcome)
            }
            Err(e) => {
                let reason = e.to_string();
                let retry_safe = e.retry_safe();
                tracing::warn!(workflow_id = %id, "rollback failed: {}", reason);
                self.registry
                    .update(id, |wf| wf.fail(Stage::Rollback, reason, retry_safe))?;
                Err(GatewayError::Rollback(e))
            }
        }
    }

    fn reject_outcome(
        &self,
        id: &str,
        kind: RollbackKind,
    ) -> Result<DecisionOutcome, GatewayError> {
        let outcome = self.reject(id, kind)?;
        Ok(DecisionOutcome {
            workflow: self.registry.get(id)?,
            publish: None,
            rollback: Some(outcome),
        })
    }

}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
