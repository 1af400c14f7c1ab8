// error.rs — Error types for the pipeline and approval gateway.

use thiserror::Error;

use gp_submit::{CheckpointError, PublishError, RevertError};
use gp_workflow::{Stage, WorkflowError};
use gp_workspace::WorkspaceError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Registry and state-machine errors: not found, duplicate id,
    /// out-of-order step, already resolved.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("{stage} failed: {source}")]
    Workspace {
        stage: Stage,
        #[source]
        source: WorkspaceError,
    },

    /// The oracle returned anything other than an explicit pass.
    #[error("validation did not pass ({verdict})")]
    ValidationFailed {
        verdict: String,
        details: Option<serde_json::Value>,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("rollback failed: {0}")]
    Rollback(#[source] CheckpointError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Revert(#[from] RevertError),

    /// An intake run or another decision for this workflow is running.
    #[error("workflow {workflow_id} has a run or decision in progress")]
    DecisionInFlight { workflow_id: String },
}

impl GatewayError {
    pub fn stage(&self) -> Stage {
        match self {
            GatewayError::Workflow(WorkflowError::AlreadyResolved { .. }) => Stage::Decision,
            GatewayError::Workflow(WorkflowError::InvalidTransition { stage, .. }) => *stage,
            GatewayError::Workflow(_) => Stage::Intake,
            GatewayError::Workspace { stage, .. } => *stage,
            GatewayError::ValidationFailed { .. } => Stage::Validate,
            GatewayError::Checkpoint(e) => e.stage(),
            GatewayError::Rollback(_) => Stage::Rollback,
            GatewayError::Publish(e) => e.stage(),
            GatewayError::Revert(e) => e.stage(),
            GatewayError::DecisionInFlight { .. } => Stage::Decision,
        }
    }

    /// Whether re-issuing the same request could succeed.
    pub fn retry_safe(&self) -> bool {
        match self {
            GatewayError::Workflow(_) | GatewayError::ValidationFailed { .. } => false,
            GatewayError::Workspace { source, .. } => source.retry_safe(),
            GatewayError::Checkpoint(e) | GatewayError::Rollback(e) => e.retry_safe(),
            GatewayError::Publish(e) => e.retry_safe(),
            GatewayError::Revert(e) => e.retry_safe(),
            GatewayError::DecisionInFlight { .. } => true,
        }
    }
}
