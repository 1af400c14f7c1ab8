// service.rs — Wire the pipeline components together from configuration.

use std::sync::Arc;

use gp_submit::{CheckpointCoordinator, PublishCoordinator, RevertCoordinator};
use gp_workflow::{EventDispatcher, LogSink, TracingSink, WorkflowRegistry};
use gp_workspace::{Workspace, WorkspaceManager};

use crate::approval::ApprovalGateway;
use crate::config::{ConfigError, PipelineConfig};
use crate::oracle::{AcceptAllOracle, CommandOracle, ValidationOracle};
use crate::pipeline::Pipeline;
use crate::slots::WorkflowSlots;

/// Intake and decision halves sharing one registry and one workspace.
#[derive(Clone)]
pub struct GatedPublish {
    pub pipeline: Arc<Pipeline>,
    pub approvals: Arc<ApprovalGateway>,
}

impl GatedPublish {
    /// Build with the oracle named by `validation.command`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let oracle: Arc<dyn ValidationOracle> = match &config.validation.command {
            Some(command) => Arc::new(CommandOracle::new(command).ok_or(ConfigError::Invalid {
                field: "validation.command",
                reason: "must name a program".to_string(),
            })?),
            None => Arc::new(AcceptAllOracle),
        };
        Self::with_oracle(config, oracle)
    }

    pub fn with_oracle(
        config: &PipelineConfig,
        oracle: Arc<dyn ValidationOracle>,
    ) -> Result<Self, ConfigError> {
        let remote = config.remote_spec()?;
        let remote_display = remote.redactor().redact(&remote.url);
        let workspace_path = config.workspace_path()?;
        let workspace = Arc::new(Workspace::new(workspace_path.clone()));
        let manager = Arc::new(WorkspaceManager::new(
            workspace,
            remote,
            config.removal_policy(),
        ));

        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(TracingSink));
        if let Some(log) = &config.events.log {
            dispatcher.add_sink(Box::new(LogSink::new(log)));
        }
        let registry = Arc::new(WorkflowRegistry::with_dispatcher(dispatcher));

        let slots = Arc::new(WorkflowSlots::new());
        let commit = config.commit.clone();
        let checkpoints = Arc::new(CheckpointCoordinator::new(
            Arc::clone(&manager),
            commit.clone(),
        ));
        let pipeline = Pipeline::new(
            Arc::clone(&registry),
            Arc::clone(&manager),
            Arc::clone(&checkpoints),
            oracle,
            Arc::clone(&slots),
        );
        let approvals = ApprovalGateway::new(
            registry,
            Arc::clone(&manager),
            checkpoints,
            PublishCoordinator::new(Arc::clone(&manager), commit.clone()),
            RevertCoordinator::new(manager, commit),
            slots,
        );

        tracing::info!(
            workspace = %workspace_path.display(),
            remote = %remote_display,
            "gated publish pipeline ready"
        );
        Ok(Self {
            pipeline: Arc::new(pipeline),
            approvals: Arc::new(approvals),
        })
    }
}
