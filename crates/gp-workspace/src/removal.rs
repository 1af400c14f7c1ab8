// removal.rs — Escalating workspace removal.
//
// Removing a clone can fail for mundane reasons: read-only pack files,
// a process still holding a handle, a half-finished previous removal.
// RemovalPolicy tries an ordered list of strategies, one per attempt, with
// a fixed backoff in between. Once the list is exhausted the last (most
// forceful) strategy is repeated until the attempt cap. The outcome is
// either "path is gone" or an explicit RemovalFailed error.

use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

use crate::error::WorkspaceError;

/// One way of deleting a directory tree.
pub trait RemovalStrategy: Send + Sync {
    /// Short name for logs and error reports.
    fn name(&self) -> &str;

    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Plain recursive delete.
pub struct PlainRemove;

impl RemovalStrategy for PlainRemove {
    fn name(&self) -> &str {
        "remove_dir_all"
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }
}

/// Make every entry owner-writable, then delete.
pub struct RelaxPermissions;

impl RelaxPermissions {
    fn relax(path: &Path) -> io::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.file_type().is_symlink() {
            return Ok(());
        }

        let mut perms = meta.permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let extra = if meta.is_dir() { 0o700 } else { 0o600 };
            perms.set_mode(perms.mode() | extra);
        }
        #[cfg(not(unix))]
        {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
        }
        fs::set_permissions(path, perms)?;

        if meta.is_dir() {
            for entry in fs::read_dir(path)? {
                Self::relax(&entry?.path())?;
            }
        }
        Ok(())
    }
}

impl RemovalStrategy for RelaxPermissions {
    fn name(&self) -> &str {
        "relax_permissions"
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        Self::relax(path)?;
        fs::remove_dir_all(path)
    }
}

/// Hand the directory to the platform's forceful delete command.
pub struct ForceRemove;

impl RemovalStrategy for ForceRemove {
    fn name(&self) -> &str {
        "force_remove"
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        #[cfg(windows)]
        let output = Command::new("cmd")
            .args(["/C", "rmdir", "/S", "/Q"])
            .arg(path)
            .output()?;
        #[cfg(not(windows))]
        let output = Command::new("rm").arg("-rf").arg(path).output()?;

        if output.status.success() {
            Ok(())
        } else {
            Err(io::Error::other(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// Ordered removal strategies with a capped attempt count.
pub struct RemovalPolicy {
    strategies: Vec<Box<dyn RemovalStrategy>>,
    max_attempts: usize,
    backoff: Duration,
}

impl RemovalPolicy {
    /// Plain delete, then relaxed permissions, then forced removal.
    pub fn escalating(max_attempts: usize, backoff: Duration) -> Self {
        Self::with_strategies(
            vec![
                Box::new(PlainRemove),
                Box::new(RelaxPermissions),
                Box::new(ForceRemove),
            ],
            max_attempts,
            backoff,
        )
    }

    pub fn with_strategies(
        strategies: Vec<Box<dyn RemovalStrategy>>,
        max_attempts: usize,
        backoff: Duration,
    ) -> Self {
        Self {
            strategies,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Remove `path` entirely. A missing path is already removed.
    pub fn remove(&self, path: &Path) -> Result<(), WorkspaceError> {
        let mut failures = Vec::new();

        for attempt in 0..self.max_attempts {
            if !exists(path) {
                return Ok(());
            }
            let Some(strategy) = self
                .strategies
                .get(attempt.min(self.strategies.len().saturating_sub(1)))
            else {
                break;
            };

            match strategy.remove(path) {
                Ok(()) if !exists(path) => {
                    if attempt > 0 {
                        tracing::info!(
                            path = %path.display(),
                            strategy = strategy.name(),
                            attempt = attempt + 1,
                            "workspace removed after retry"
                        );
                    }
                    return Ok(());
                }
                Ok(()) => failures.push(format!("{}: path still present", strategy.name())),
                Err(e) => failures.push(format!("{}: {}", strategy.name(), e)),
            }

            tracing::warn!(
                path = %path.display(),
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                "workspace removal failed: {}",
                failures.last().map(String::as_str).unwrap_or_default()
            );
            if attempt + 1 < self.max_attempts {
                thread::sleep(self.backoff);
            }
        }

        if !exists(path) {
            return Ok(());
        }
        Err(WorkspaceError::RemovalFailed {
            path: path.to_path_buf(),
            attempts: failures,
        })
    }
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}
