//! Git-facing coordinators for the staged publication pipeline.
//!
//! A validated change set becomes a local checkpoint commit; an approved
//! checkpoint is replayed onto a fresh clone of the remote tip and pushed;
//! the most recent pushed commit can be reverted with an inverse commit.
//! Every commit this crate makes carries the trailers defined in [`marker`]
//! so later steps can tell system-authored commits apart.

pub mod checkpoint;
pub mod config;
pub mod git;
pub mod history;
pub mod marker;
pub mod publish;
pub mod revert;

pub use checkpoint::{CheckpointCoordinator, CheckpointError, RollbackOutcome};
pub use config::CommitConfig;
pub use git::{CommitInfo, GitAdapter, PushRejection};
pub use history::{CommitHistory, MAX_HISTORY};
pub use marker::{CommitAnnotation, ParsedMarker};
pub use publish::{PublishCoordinator, PublishError};
pub use revert::{NotRevertableReason, RevertCoordinator, RevertError};
