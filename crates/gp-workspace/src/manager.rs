// manager.rs — WorkspaceManager: fresh isolation for every request.
//
// reset() is the only way a workspace comes into existence: remove
// whatever is at the path, then clone the remote tip into it. A stale
// clone (leftover files, old tip) is never reused. Clone failures are not
// retried here; they end the current workflow with a retry-safe error.
//
// apply_files() is the ChangeApplier boundary: it writes the proposed
// change set into the clone and returns the ordered set of touched paths.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use gp_workflow::ChangedPaths;

use crate::error::WorkspaceError;
use crate::git::{Git, Redactor, RemoteSpec};
use crate::lock::{Workspace, WorkspaceGuard};
use crate::removal::RemovalPolicy;

/// Point-in-time view of the workspace for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceStatus {
    pub path: PathBuf,

    /// A clone is present at the path.
    pub cloned: bool,

    /// The lock is held; clean/dirty was not inspected.
    pub busy: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_tip: Option<String>,

    /// `None` when busy or not cloned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean: Option<bool>,
}

/// Owns the lifecycle of the shared workspace clone.
pub struct WorkspaceManager {
    workspace: Arc<Workspace>,
    remote: RemoteSpec,
    removal: RemovalPolicy,
    redactor: Redactor,
}

impl WorkspaceManager {
    pub fn new(workspace: Arc<Workspace>, remote: RemoteSpec, removal: RemovalPolicy) -> Self {
        let redactor = remote.redactor();
        Self {
            workspace,
            remote,
            removal,
            redactor,
        }
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn remote(&self) -> &RemoteSpec {
        &self.remote
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Git runner bound to the workspace clone.
    pub fn git(&self, guard: &WorkspaceGuard<'_>) -> Result<Git, WorkspaceError> {
        self.check_guard(guard)?;
        Ok(Git::new(guard.path()).with_redactor(self.redactor.clone()))
    }

    /// Remove the workspace and clone the remote tip into it.
    pub fn reset(&self, guard: &WorkspaceGuard<'_>) -> Result<PathBuf, WorkspaceError> {
        self.check_guard(guard)?;
        let path = guard.path().to_path_buf();

        guard.mark_unsynced();
        self.removal.remove(&path)?;

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|source| WorkspaceError::IoError {
            path: parent.clone(),
            source,
        })?;

        tracing::info!(
            path = %path.display(),
            remote = %self.redactor.redact(&self.remote.url),
            branch = %self.remote.branch,
            "cloning fresh workspace"
        );
        let url = self.remote.authenticated_url();
        let target = path.to_string_lossy().into_owned();
        Git::new(&parent)
            .with_redactor(self.redactor.clone())
            .run(&[
                "clone",
                "--quiet",
                "--branch",
                &self.remote.branch,
                &url,
                &target,
            ])
            .map_err(WorkspaceError::CloneFailed)?;

        let tip = self.git(guard)?.run(&["rev-parse", "HEAD"])?;
        guard.mark_synced(tip.clone());
        tracing::info!(path = %path.display(), tip = %tip, "workspace reset complete");
        Ok(path)
    }

    /// Write a change set into the workspace.
    ///
    /// Paths are validated before anything is written, so a bad path leaves
    /// the clone untouched. Returns the touched paths in application order.
    pub fn apply_files<I, P, C>(
        &self,
        guard: &WorkspaceGuard<'_>,
        files: I,
    ) -> Result<ChangedPaths, WorkspaceError>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: AsRef<[u8]>,
    {
        self.check_guard(guard)?;

        let mut planned: Vec<(String, C)> = Vec::new();
        for (path, content) in files {
            let normalized = normalize_path(path.as_ref())?;
            match planned.iter_mut().find(|(p, _)| *p == normalized) {
                // Last write wins for the content; position stays first-seen.
                Some(existing) => existing.1 = content,
                None => planned.push((normalized, content)),
            }
        }
        if planned.is_empty() {
            return Err(WorkspaceError::EmptyChangeSet);
        }

        let mut resolved = Vec::with_capacity(planned.len());
        for (relative, content) in planned {
            let full_path = resolve_path(guard.path(), &relative)?;
            resolved.push((relative, full_path, content));
        }

        let mut changed = ChangedPaths::new();
        for (relative, full_path, content) in resolved {
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent).map_err(|source| WorkspaceError::IoError {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&full_path, content.as_ref()).map_err(|source| {
                WorkspaceError::IoError {
                    path: full_path.clone(),
                    source,
                }
            })?;
            changed.insert(relative);
        }

        tracing::info!(files = changed.len(), "change set applied to workspace");
        Ok(changed)
    }

    /// Read a file from the workspace clone.
    pub fn read_file(
        &self,
        guard: &WorkspaceGuard<'_>,
        relative_path: &str,
    ) -> Result<Vec<u8>, WorkspaceError> {
        self.check_guard(guard)?;
        let full_path = resolve_path(guard.path(), &normalize_path(relative_path)?)?;
        fs::read(&full_path).map_err(|source| WorkspaceError::IoError {
            path: full_path,
            source,
        })
    }

    /// Status snapshot. Never waits for the workspace lock.
    pub fn status(&self) -> WorkspaceStatus {
        let path = self.workspace.path().to_path_buf();
        let cloned = path.join(".git").exists();
        let sync = self.workspace.last_sync();

        let (busy, clean) = match self.workspace.try_lock() {
            None => (true, None),
            Some(guard) if cloned => {
                let clean = Git::new(guard.path())
                    .with_redactor(self.redactor.clone())
                    .run(&["status", "--porcelain"])
                    .map(|out| out.is_empty())
                    .ok();
                (false, clean)
            }
            Some(_) => (false, None),
        };

        WorkspaceStatus {
            path,
            cloned,
            busy,
            last_synced_at: sync.as_ref().map(|s| s.synced_at),
            remote_tip: sync.map(|s| s.tip),
            clean,
        }
    }

    fn check_guard(&self, guard: &WorkspaceGuard<'_>) -> Result<(), WorkspaceError> {
        if guard.guards(&self.workspace) {
            Ok(())
        } else {
            Err(WorkspaceError::ForeignGuard {
                path: self.workspace.path().to_path_buf(),
            })
        }
    }
}

/// Normalize a change-set path to forward-slash relative form.
///
/// Rejects absolute paths, `..` components, and anything under `.git`.
pub fn normalize_path(raw: &str) -> Result<String, WorkspaceError> {
    let invalid = |reason: &str| WorkspaceError::InvalidPath {
        path: raw.to_string(),
        reason: reason.to_string(),
    };

    let unified = raw.replace('\\', "/");
    if unified.trim().is_empty() {
        return Err(invalid("empty path"));
    }
    if unified.contains('\0') {
        return Err(invalid("contains NUL"));
    }
    if unified.starts_with('/') || Path::new(&unified).is_absolute() || unified.contains(':') {
        return Err(invalid("must be relative"));
    }

    let mut parts = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(WorkspaceError::PathTraversal {
                    path: raw.to_string(),
                })
            }
            Component::RootDir | Component::Prefix(_) => return Err(invalid("must be relative")),
        }
    }

    match parts.first() {
        None => Err(invalid("empty path")),
        Some(first) if first.eq_ignore_ascii_case(".git") => {
            Err(invalid("git metadata is not writable"))
        }
        Some(_) => Ok(parts.join("/")),
    }
}

/// Join a normalized path onto the workspace root.
///
/// Fails if any existing component below the root, the target included,
/// is a symlink: a link committed to the remote could point anywhere.
fn resolve_path(root: &Path, relative: &str) -> Result<PathBuf, WorkspaceError> {
    let traversal = || WorkspaceError::PathTraversal {
        path: relative.to_string(),
    };
    let full_path = root.join(relative);
    if !full_path.starts_with(root) {
        return Err(traversal());
    }

    let mut current = root.to_path_buf();
    for part in relative.split('/') {
        current.push(part);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return Err(traversal()),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(source) => {
                return Err(WorkspaceError::IoError {
                    path: current,
                    source,
                })
            }
        }
    }
    Ok(full_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn git(dir: &Path, args: &[&str]) {
        let out = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(out.status.success(), "git {:?}: {:?}", args, out);
    }

    /// A bare "remote" on branch main with one commit containing README.md.
    fn bare_remote() -> (TempDir, PathBuf) {
        let root = tempdir().unwrap();
        let seed = root.path().join("seed");
        fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&seed, &["config", "user.name", "Test User"]);
        git(&seed, &["config", "user.email", "test@example.com"]);
        fs::write(seed.join("README.md"), "# Test\n").unwrap();
        git(&seed, &["add", "."]);
        git(&seed, &["commit", "--quiet", "-m", "Initial commit"]);

        let bare = root.path().join("remote.git");
        git(
            root.path(),
            &["clone", "--quiet", "--bare", "seed", "remote.git"],
        );
        (root, bare)
    }

    fn manager(root: &Path, remote: &Path) -> WorkspaceManager {
        let workspace = Arc::new(Workspace::new(root.join("work/clone")));
        WorkspaceManager::new(
            workspace,
            RemoteSpec::new(remote.to_string_lossy()),
            RemovalPolicy::escalating(3, Duration::ZERO),
        )
    }

    #[test]
    fn reset_clones_remote_tip() {
        let (root, remote) = bare_remote();
        let mgr = manager(root.path(), &remote);
        let guard = mgr.workspace().lock();

        let path = mgr.reset(&guard).unwrap();
        assert!(path.join("README.md").exists());
        assert!(path.join(".git").exists());
        assert_eq!(mgr.workspace().last_sync().unwrap().tip.len(), 40);
    }

    #[test]
    fn reset_discards_leftover_files() {
        let (root, remote) = bare_remote();
        let mgr = manager(root.path(), &remote);
        let guard = mgr.workspace().lock();

        let path = mgr.reset(&guard).unwrap();
        fs::write(path.join("stale.txt"), "left behind").unwrap();
        fs::write(path.join("README.md"), "edited").unwrap();

        mgr.reset(&guard).unwrap();
        assert!(!path.join("stale.txt").exists());
        assert_eq!(fs::read_to_string(path.join("README.md")).unwrap(), "# Test\n");
    }

    #[test]
    fn reset_replaces_non_git_directory() {
        let (root, remote) = bare_remote();
        let mgr = manager(root.path(), &remote);
        let guard = mgr.workspace().lock();

        let path = guard.path().to_path_buf();
        fs::create_dir_all(path.join("junk")).unwrap();
        fs::write(path.join("junk/file"), "x").unwrap();

        mgr.reset(&guard).unwrap();
        assert!(!path.join("junk").exists());
        assert!(path.join("README.md").exists());
    }

    #[test]
    fn clone_failure_is_terminal_and_leaves_no_directory() {
        let root = tempdir().unwrap();
        let mgr = manager(root.path(), &root.path().join("does-not-exist.git"));
        let guard = mgr.workspace().lock();

        let err = mgr.reset(&guard).unwrap_err();
        assert!(matches!(err, WorkspaceError::CloneFailed(_)));
        assert!(err.retry_safe());
        assert!(mgr.workspace().last_sync().is_none());
        assert!(!guard.path().join(".git").exists());
    }

    #[test]
    fn apply_files_writes_and_orders_paths() {
        let (root, remote) = bare_remote();
        let mgr = manager(root.path(), &remote);
        let guard = mgr.workspace().lock();
        mgr.reset(&guard).unwrap();

        let changed = mgr
            .apply_files(
                &guard,
                vec![
                    ("src/b.txt", "b"),
                    ("./a.txt", "a1"),
                    ("a.txt", "a2"),
                ],
            )
            .unwrap();
        assert_eq!(changed.as_slice(), &["src/b.txt", "a.txt"]);
        assert_eq!(mgr.read_file(&guard, "a.txt").unwrap(), b"a2");
        assert_eq!(mgr.read_file(&guard, "src/b.txt").unwrap(), b"b");
    }

    #[test]
    fn apply_files_rejects_bad_paths_before_writing() {
        let (root, remote) = bare_remote();
        let mgr = manager(root.path(), &remote);
        let guard = mgr.workspace().lock();
        mgr.reset(&guard).unwrap();

        let err = mgr
            .apply_files(&guard, vec![("ok.txt", "fine"), ("../escape.txt", "bad")])
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::PathTraversal { .. }));
        assert!(!err.retry_safe());
        assert!(!guard.path().join("ok.txt").exists());

        let err = mgr
            .apply_files(&guard, vec![(".git/config", "bad")])
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidPath { .. }));

        let empty: Vec<(&str, &str)> = Vec::new();
        assert!(matches!(
            mgr.apply_files(&guard, empty),
            Err(WorkspaceError::EmptyChangeSet)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn apply_files_refuses_to_write_through_symlinks() {
        let root = tempdir().unwrap();
        let outside = root.path().join("outside");
        fs::create_dir_all(&outside).unwrap();

        let seed = root.path().join("seed");
        fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&seed, &["config", "user.name", "Test User"]);
        git(&seed, &["config", "user.email", "test@example.com"]);
        fs::write(seed.join("README.md"), "# Test\n").unwrap();
        std::os::unix::fs::symlink(&outside, seed.join("link")).unwrap();
        std::os::unix::fs::symlink(outside.join("target.txt"), seed.join("file-link")).unwrap();
        git(&seed, &["add", "."]);
        git(&seed, &["commit", "--quiet", "-m", "Add links"]);
        git(
            root.path(),
            &["clone", "--quiet", "--bare", "seed", "remote.git"],
        );

        let mgr = manager(root.path(), &root.path().join("remote.git"));
        let guard = mgr.workspace().lock();
        mgr.reset(&guard).unwrap();

        let err = mgr
            .apply_files(&guard, vec![("ok.txt", "fine"), ("link/owned.txt", "x")])
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::PathTraversal { .. }));
        assert!(!err.retry_safe());
        assert!(!outside.join("owned.txt").exists());
        assert!(!guard.path().join("ok.txt").exists());

        let err = mgr
            .apply_files(&guard, vec![("file-link", "x")])
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::PathTraversal { .. }));
        assert!(!outside.join("target.txt").exists());

        // New directories below the root are fine.
        let changed = mgr
            .apply_files(&guard, vec![("fresh/dir/new.txt", "y")])
            .unwrap();
        assert_eq!(changed.as_slice(), &["fresh/dir/new.txt"]);
    }

    #[test]
    fn foreign_guard_is_rejected() {
        let (root, remote) = bare_remote();
        let mgr = manager(root.path(), &remote);
        let other = Workspace::new(root.path().join("elsewhere"));
        let guard = other.lock();
        assert!(matches!(
            mgr.reset(&guard),
            Err(WorkspaceError::ForeignGuard { .. })
        ));
    }

    #[test]
    fn status_reports_busy_without_blocking() {
        let (root, remote) = bare_remote();
        let mgr = manager(root.path(), &remote);
        {
            let guard = mgr.workspace().lock();
            mgr.reset(&guard).unwrap();
            let status = mgr.status();
            assert!(status.busy);
            assert!(status.clean.is_none());
        }

        let status = mgr.status();
        assert!(!status.busy);
        assert!(status.cloned);
        assert_eq!(status.clean, Some(true));
        assert!(status.last_synced_at.is_some());

        fs::write(mgr.workspace().path().join("dirty.txt"), "x").unwrap();
        assert_eq!(mgr.status().clean, Some(false));
    }

    #[test]
    fn normalize_path_cases() {
        assert_eq!(normalize_path("a/./b.txt").unwrap(), "a/b.txt");
        assert_eq!(normalize_path("dir\\file.txt").unwrap(), "dir/file.txt");
        assert!(normalize_path("/etc/passwd").is_err());
        assert!(normalize_path("C:/x").is_err());
        assert!(normalize_path("a/../../b").is_err());
        assert!(normalize_path("").is_err());
        assert!(normalize_path(".").is_err());
        assert!(normalize_path(".GIT/hooks/pre-commit").is_err());
    }
}
