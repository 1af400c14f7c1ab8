//! # gp-workflow
//!
//! Workflow lifecycle management and event dispatch for Gated Publish.
//!
//! A [`Workflow`] is one change request moving through the staged
//! publication pipeline. The state machine only moves forward along the
//! pipeline, with explicit rollback edges out of `awaiting_decision` and a
//! failure edge out of every non-terminal state.
//!
//! ## Key components
//!
//! - [`Workflow`] — the lifecycle state machine (Initialized → ChangesApplied
//!   → Validated → Checkpointed → AwaitingDecision → Published / RolledBack*)
//! - [`Checkpoint`] / [`PublishRecord`] — immutable records attached to a workflow
//! - [`WorkflowRegistry`] — process-lifetime map of workflows plus the
//!   "last publish" pointer
//! - [`PipelineEvent`] / [`EventDispatcher`] — lifecycle notifications

pub mod error;
pub mod events;
pub mod registry;
pub mod workflow;

pub use error::WorkflowError;
pub use events::{EventDispatcher, LogSink, NotificationSink, PipelineEvent, TracingSink};
pub use registry::WorkflowRegistry;
pub use workflow::{
    Annotation, ChangedPaths, Checkpoint, FileSnapshot, PublishRecord, RollbackKind, Stage,
    Workflow, WorkflowState,
};
