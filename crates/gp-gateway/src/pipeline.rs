// pipeline.rs — Request intake: reset, apply, validate, checkpoint.
//
// Each step takes the workspace guard explicitly; `submit` holds one guard
// across all of them. A step that fails records `failed` with its stage on
// the workflow before returning the error, so the registry never shows a
// workflow stuck mid-pipeline.

use std::fmt::Display;
use std::sync::Arc;

use gp_submit::CheckpointCoordinator;
use gp_workflow::{PipelineEvent, Stage, Workflow, WorkflowRegistry, WorkflowState};
use gp_workspace::{WorkspaceGuard, WorkspaceManager, WorkspaceStatus};

use crate::error::GatewayError;
use crate::oracle::ValidationOracle;
use crate::request::{ChangeRequest, ChangeSet};
use crate::slots::WorkflowSlots;

pub struct Pipeline {
    registry: Arc<WorkflowRegistry>,
    manager: Arc<WorkspaceManager>,
    checkpoints: Arc<CheckpointCoordinator>,
    oracle: Arc<dyn ValidationOracle>,
    slots: Arc<WorkflowSlots>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        manager: Arc<WorkspaceManager>,
        checkpoints: Arc<CheckpointCoordinator>,
        oracle: Arc<dyn ValidationOracle>,
        slots: Arc<WorkflowSlots>,
    ) -> Self {
        Self {
            registry,
            manager,
            checkpoints,
            oracle,
            slots,
        }
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    /// Wait for exclusive use of the workspace.
    pub fn lock(&self) -> WorkspaceGuard<'_> {
        self.manager.workspace().lock()
    }

    pub fn workspace_status(&self) -> WorkspaceStatus {
        self.manager.status()
    }

    /// Register a workflow. Touches only the registry.
    pub fn create(
        &self,
        id: Option<String>,
        description: &str,
        risk_assessment: Option<serde_json::Value>,
    ) -> Result<Workflow, GatewayError> {
        let workflow = self
            .registry
            .create(Workflow::new(id, description).with_risk_assessment(risk_assessment))?;
        tracing::info!(workflow_id = %workflow.id, "workflow created");
        Ok(workflow)
    }

    /// Reset the workspace to the remote tip and write `files` into it.
    pub fn apply_changes(
        &self,
        guard: &WorkspaceGuard<'_>,
        id: &str,
        files: &ChangeSet,
    ) -> Result<Workflow, GatewayError> {
        self.registry
            .get(id)?
            .ensure_can(&WorkflowState::ChangesApplied)?;

        if let Err(source) = self.manager.reset(guard) {
            self.fail(id, Stage::Reset, &source, source.retry_safe());
            return Err(GatewayError::Workspace {
                stage: Stage::Reset,
                source,
            });
        }

        let changed = match self.manager.apply_files(guard, files.iter()) {
            Ok(changed) => changed,
            Err(source) => {
                self.fail(id, Stage::Apply, &source, source.retry_safe());
                return Err(GatewayError::Workspace {
                    stage: Stage::Apply,
                    source,
                });
            }
        };

        Ok(self.registry.update(id, |wf| wf.mark_applied(changed))?)
    }

    /// Ask the oracle about the applied change set. Anything short of an
    /// explicit pass fails the workflow.
    pub fn validate(&self, guard: &WorkspaceGuard<'_>, id: &str) -> Result<Workflow, GatewayError> {
        let workflow = self.registry.get(id)?;
        workflow.ensure_can(&WorkflowState::Validated)?;

        let report = self
            .oracle
            .validate(guard.path(), id, &workflow.changed_paths);
        tracing::info!(
            workflow_id = %id,
            oracle = self.oracle.name(),
            verdict = %report.verdict,
            "validation finished"
        );

        if report.is_pass() {
            return Ok(self
                .registry
                .update(id, |wf| wf.mark_validated(report.details))?);
        }

        let verdict = report.verdict.to_string();
        let details = report.details;
        let recorded = details.clone();
        let reason = format!("validation did not pass ({})", verdict);
        if let Err(e) = self.registry.update(id, |wf| {
            wf.validation_details = recorded;
            wf.fail(Stage::Validate, reason, false)
        }) {
            tracing::warn!(workflow_id = %id, error = %e, "could not record validation failure");
        }
        Err(GatewayError::ValidationFailed { verdict, details })
    }

    /// Commit the validated change set locally and wait for a decision.
    pub fn checkpoint(
        &self,
        guard: &WorkspaceGuard<'_>,
        id: &str,
    ) -> Result<Workflow, GatewayError> {
        let workflow = self.registry.get(id)?;
        workflow.ensure_can(&WorkflowState::Checkpointed)?;

        let checkpoint = match self.checkpoints.checkpoint(
            guard,
            id,
            &workflow.changed_paths,
            &workflow.annotation(),
        ) {
            Ok(cp) => cp,
            Err(e) => {
                self.fail(id, e.stage(), &e, e.retry_safe());
                return Err(e.into());
            }
        };

        let event = PipelineEvent::checkpoint_created(id, &checkpoint);
        self.registry
            .update(id, |wf| wf.mark_checkpointed(checkpoint))?;
        let workflow = self.registry.update(id, |wf| wf.await_decision())?;
        self.registry.dispatcher().dispatch(&event);
        Ok(workflow)
    }

    /// Run apply, validate, and checkpoint for an existing workflow under
    /// one workspace lock hold. Holds the workflow's slot throughout, so it
    /// cannot be discarded mid-run.
    pub fn run(&self, id: &str, files: &ChangeSet) -> Result<Workflow, GatewayError> {
        self.slots.with(id, || {
            let guard = self.lock();
            self.apply_changes(&guard, id, files)?;
            self.validate(&guard, id)?;
            self.checkpoint(&guard, id)
        })
    }

    /// Create a workflow from `request` and take it to `awaiting_decision`.
    ///
    /// On failure the workflow stays in the registry in the `failed` state.
    pub fn submit(&self, request: &ChangeRequest) -> Result<Workflow, GatewayError> {
        let workflow = self.create(
            request.id.clone(),
            &request.description,
            request.risk_assessment.clone(),
        )?;
        self.run(&workflow.id, &request.files)
    }

    fn fail(&self, id: &str, stage: Stage, err: &dyn Display, retry_safe: bool) {
        let reason = err.to_string();
        tracing::warn!(workflow_id = %id, stage = %stage, retry_safe, "{}", reason);
        if let Err(e) = self
            .registry
            .update(id, |wf| wf.fail(stage, reason, retry_safe))
        {
            tracing::warn!(workflow_id = %id, error = %e, "could not record failure");
        }
    }
}
