// workflow.rs — Workflow: one change request moving through the pipeline.
//
// A Workflow ties together everything the pipeline knows about a request:
// - The free-text description supplied by the requester
// - The ordered set of paths the change set touched
// - The local checkpoint once validation passed
// - The publish record once the change reached the remote
//
// The state machine enforces the pipeline order:
//   Initialized → ChangesApplied → Validated → Checkpointed
//     → AwaitingDecision → Published | RolledBackSoft | RolledBackHard
//   (or Failed from any non-terminal state)
//
// Terminal states never transition again. Data is attached by the same
// method that moves the state, so a workflow can't carry a publish record
// without being Published.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::WorkflowError;

/// Pipeline stage an operation (or failure) belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Reset,
    Apply,
    Validate,
    Checkpoint,
    Decision,
    Publish,
    Rollback,
    Revert,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Intake => "intake",
            Stage::Reset => "reset",
            Stage::Apply => "apply",
            Stage::Validate => "validate",
            Stage::Checkpoint => "checkpoint",
            Stage::Decision => "decision",
            Stage::Publish => "publish",
            Stage::Rollback => "rollback",
            Stage::Revert => "revert",
        };
        f.write_str(name)
    }
}

/// The lifecycle state of a Workflow.
///
/// Serializes as `{"state": "awaiting_decision"}`; `Failed` carries the
/// stage, the reason, and whether re-issuing the request is safe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    /// Registered, nothing written yet.
    Initialized,

    /// The change set was written into the workspace.
    ChangesApplied,

    /// The validation oracle returned an explicit pass.
    Validated,

    /// A local checkpoint commit exists.
    Checkpointed,

    /// Waiting for an approve / reject decision.
    AwaitingDecision,

    /// The change set was pushed to the remote.
    Published,

    /// Checkpoint undone, files left in the workspace unstaged.
    RolledBackSoft,

    /// Checkpoint undone and the changed paths restored.
    RolledBackHard,

    /// The workflow failed at some stage.
    Failed {
        stage: Stage,
        reason: String,
        retry_safe: bool,
    },
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Initialized => write!(f, "initialized"),
            WorkflowState::ChangesApplied => write!(f, "changes_applied"),
            WorkflowState::Validated => write!(f, "validated"),
            WorkflowState::Checkpointed => write!(f, "checkpointed"),
            WorkflowState::AwaitingDecision => write!(f, "awaiting_decision"),
            WorkflowState::Published => write!(f, "published"),
            WorkflowState::RolledBackSoft => write!(f, "rolled_back_soft"),
            WorkflowState::RolledBackHard => write!(f, "rolled_back_hard"),
            WorkflowState::Failed { .. } => write!(f, "failed"),
        }
    }
}

impl WorkflowState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Published
                | WorkflowState::RolledBackSoft
                | WorkflowState::RolledBackHard
                | WorkflowState::Failed { .. }
        )
    }

    /// The stage whose success moves a workflow into this state.
    pub fn reached_by(&self) -> Stage {
        match self {
            WorkflowState::Initialized => Stage::Intake,
            WorkflowState::ChangesApplied => Stage::Apply,
            WorkflowState::Validated => Stage::Validate,
            WorkflowState::Checkpointed | WorkflowState::AwaitingDecision => Stage::Checkpoint,
            WorkflowState::Published
            | WorkflowState::RolledBackSoft
            | WorkflowState::RolledBackHard => Stage::Decision,
            WorkflowState::Failed { stage, .. } => *stage,
        }
    }

    /// Check whether transitioning from this state to `next` is valid.
    pub fn can_transition_to(&self, next: &WorkflowState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, WorkflowState::Failed { .. }) {
            return true;
        }

        matches!(
            (self, next),
            (WorkflowState::Initialized, WorkflowState::ChangesApplied)
                | (WorkflowState::ChangesApplied, WorkflowState::Validated)
                | (WorkflowState::Validated, WorkflowState::Checkpointed)
                | (WorkflowState::Checkpointed, WorkflowState::AwaitingDecision)
                | (WorkflowState::AwaitingDecision, WorkflowState::Published)
                | (WorkflowState::AwaitingDecision, WorkflowState::RolledBackSoft)
                | (WorkflowState::AwaitingDecision, WorkflowState::RolledBackHard)
        )
    }
}

/// Which rollback flavour resolved a workflow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RollbackKind {
    /// Undo the commit, keep the files.
    Soft,
    /// Undo the commit and restore the changed paths.
    Hard,
}

impl RollbackKind {
    fn target_state(self) -> WorkflowState {
        match self {
            RollbackKind::Soft => WorkflowState::RolledBackSoft,
            RollbackKind::Hard => WorkflowState::RolledBackHard,
        }
    }
}

/// Ordered set of relative paths; insertion order is application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangedPaths(Vec<String>);

impl ChangedPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a path. Returns false if it was already present.
    pub fn insert(&mut self, path: impl Into<String>) -> bool {
        let path = path.into();
        if self.0.contains(&path) {
            return false;
        }
        self.0.push(path);
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.iter().any(|p| p == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ChangedPaths {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut paths = ChangedPaths::new();
        for p in iter {
            paths.insert(p);
        }
        paths
    }
}

/// Structured provenance carried by checkpoint and publish commits.
///
/// `risk_assessment` and `validation_details` are opaque payloads from
/// external collaborators; the pipeline only forwards them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_details: Option<serde_json::Value>,
}

/// Content of one changed path captured at checkpoint time.
///
/// The bytes are kept in memory only; serialized views show the digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: String,
    pub sha256: String,
    pub size: u64,
    #[serde(skip)]
    pub content: Vec<u8>,
}

impl FileSnapshot {
    pub fn new(path: impl Into<String>, content: Vec<u8>) -> Self {
        let sha256 = format!("{:x}", Sha256::digest(&content));
        Self {
            path: path.into(),
            sha256,
            size: content.len() as u64,
            content,
        }
    }
}

/// An immutable local record of a validated change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Local commit id of the checkpoint.
    pub checkpoint_ref: String,

    /// Commit the checkpoint was made on top of (the clone tip).
    pub base_ref: String,

    pub created_at: DateTime<Utc>,

    pub annotation: Annotation,

    /// Recorded contents of every changed path, in application order.
    pub files: Vec<FileSnapshot>,
}

/// A commit this pipeline pushed to the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRecord {
    /// Remote commit id actually pushed.
    pub remote_ref: String,

    pub pushed_at: DateTime<Utc>,

    /// Checkpoint the publish came from. For revert commits this is the
    /// remote commit that was reverted.
    pub source_checkpoint_ref: String,

    /// Owning workflow. A revert record names the workflow whose publish
    /// it undid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

/// One change request from intake to resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,

    /// Free-text summary of the requested change (provenance only).
    pub description: String,

    /// Current lifecycle state.
    #[serde(flatten)]
    pub state: WorkflowState,

    pub changed_paths: ChangedPaths,

    /// Opaque risk-assessment payload supplied with the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<serde_json::Value>,

    /// Opaque details from the validation oracle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_details: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_result: Option<PublishRecord>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create a new workflow in the Initialized state. A missing id is
    /// replaced with a fresh UUID.
    pub fn new(id: Option<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            description: description.into(),
            state: WorkflowState::Initialized,
            changed_paths: ChangedPaths::new(),
            risk_assessment: None,
            validation_details: None,
            checkpoint: None,
            publish_result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_risk_assessment(mut self, risk: Option<serde_json::Value>) -> Self {
        self.risk_assessment = risk;
        self
    }

    /// Annotation describing this workflow as of now.
    pub fn annotation(&self) -> Annotation {
        Annotation {
            description: self.description.clone(),
            risk_assessment: self.risk_assessment.clone(),
            validation_details: self.validation_details.clone(),
        }
    }

    /// The change set was written into the workspace.
    pub fn mark_applied(&mut self, paths: ChangedPaths) -> Result<(), WorkflowError> {
        self.transition(WorkflowState::ChangesApplied)?;
        self.changed_paths = paths;
        Ok(())
    }

    /// The validation oracle passed this change set.
    pub fn mark_validated(
        &mut self,
        details: Option<serde_json::Value>,
    ) -> Result<(), WorkflowError> {
        self.transition(WorkflowState::Validated)?;
        self.validation_details = details;
        Ok(())
    }

    /// A local checkpoint was created.
    pub fn mark_checkpointed(&mut self, checkpoint: Checkpoint) -> Result<(), WorkflowError> {
        self.transition(WorkflowState::Checkpointed)?;
        self.checkpoint = Some(checkpoint);
        Ok(())
    }

    pub fn await_decision(&mut self) -> Result<(), WorkflowError> {
        self.transition(WorkflowState::AwaitingDecision)
    }

    /// The checkpoint was pushed to the remote.
    pub fn mark_published(&mut self, record: PublishRecord) -> Result<(), WorkflowError> {
        self.transition(WorkflowState::Published)?;
        self.publish_result = Some(record);
        Ok(())
    }

    /// The checkpoint was discarded. The checkpoint record itself is dropped.
    pub fn mark_rolled_back(&mut self, kind: RollbackKind) -> Result<(), WorkflowError> {
        self.transition(kind.target_state())?;
        self.checkpoint = None;
        Ok(())
    }

    /// Record an unrecoverable failure at `stage`.
    pub fn fail(
        &mut self,
        stage: Stage,
        reason: impl Into<String>,
        retry_safe: bool,
    ) -> Result<(), WorkflowError> {
        self.transition(WorkflowState::Failed {
            stage,
            reason: reason.into(),
            retry_safe,
        })
    }

    /// Check a transition without performing it. Lets callers refuse a
    /// request before doing any workspace work for it.
    pub fn ensure_can(&self, next: &WorkflowState) -> Result<(), WorkflowError> {
        if self.state.is_terminal() {
            return Err(WorkflowError::AlreadyResolved {
                workflow_id: self.id.clone(),
                state: self.state.to_string(),
            });
        }
        if !self.state.can_transition_to(next) {
            return Err(WorkflowError::InvalidTransition {
                workflow_id: self.id.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
                stage: next.reached_by(),
            });
        }
        Ok(())
    }

    fn transition(&mut self, new_state: WorkflowState) -> Result<(), WorkflowError> {
        self.ensure_can(&new_state)?;
        self.state = new_state;
        self.updated_at = Utc::now();
        Ok(())
    }
}
