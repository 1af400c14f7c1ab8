//! # gp-workspace
//!
//! The single shared workspace for Gated Publish.
//!
//! Every change request starts from a fresh clone of the remote: the
//! existing directory is removed (with an escalating retry policy) and the
//! remote tip is cloned again. All filesystem work against the clone holds
//! the workspace's exclusive, first-come-first-served lock; operations take
//! a [`WorkspaceGuard`] as proof.
//!
//! ## Key components
//!
//! - [`Workspace`] — the shared resource: path, FIFO lock, sync bookkeeping
//! - [`WorkspaceManager`] — `reset()` (remove + reclone) and file application
//! - [`RemovalPolicy`] — ordered [`RemovalStrategy`] list with capped attempts
//! - [`Git`] — git process runner with credential redaction

pub mod error;
pub mod git;
pub mod lock;
pub mod manager;
pub mod removal;

pub use error::WorkspaceError;
pub use git::{Git, GitError, Redactor, RemoteSpec};
pub use lock::{SyncInfo, Workspace, WorkspaceGuard};
pub use manager::{WorkspaceManager, WorkspaceStatus};
pub use removal::{ForceRemove, PlainRemove, RelaxPermissions, RemovalPolicy, RemovalStrategy};
