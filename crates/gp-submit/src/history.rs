//! Recent commits on the remote branch.
//!
//! Fetches into the existing clone instead of recloning, so HEAD and the
//! working tree (and any checkpoint waiting on a decision) stay put.

use std::sync::Arc;

use gp_workspace::{WorkspaceError, WorkspaceGuard, WorkspaceManager};

use crate::config::CommitConfig;
use crate::git::{CommitInfo, GitAdapter};

/// Upper bound on commits returned by one query.
pub const MAX_HISTORY: usize = 100;

pub struct CommitHistory {
    manager: Arc<WorkspaceManager>,
}

impl CommitHistory {
    pub fn new(manager: Arc<WorkspaceManager>) -> Self {
        Self { manager }
    }

    /// The newest `limit` commits on the remote branch (clamped to
    /// `1..=MAX_HISTORY`), newest first.
    pub fn recent(
        &self,
        guard: &WorkspaceGuard<'_>,
        limit: usize,
    ) -> Result<Vec<CommitInfo>, WorkspaceError> {
        if !guard.path().join(".git").exists() {
            self.manager.reset(guard)?;
        }

        let git = self.manager.git(guard)?;
        let branch = &self.manager.remote().branch;
        let tracking = format!("refs/remotes/origin/{}", branch);
        let refspec = format!("+refs/heads/{}:{}", branch, tracking);
        git.run(&["fetch", "--quiet", "origin", &refspec])?;

        let adapter = GitAdapter::new(git, CommitConfig::default());
        let commits = adapter.history(&tracking, limit.clamp(1, MAX_HISTORY))?;
        tracing::debug!(branch = %branch, commits = commits.len(), "remote history read");
        Ok(commits)
    }
}
