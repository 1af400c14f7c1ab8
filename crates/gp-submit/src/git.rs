//! Git adapter for checkpoint, publish, and revert commits

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gp_workspace::{Git, GitError};

use crate::config::CommitConfig;
use crate::marker::parse_commit_message;

/// Why a push was refused, as far as git's output tells us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushRejection {
    /// The remote moved; our commit does not descend from its tip.
    NonFastForward,
    Auth,
    Network,
    Other,
}

impl PushRejection {
    /// Classify a failed push from its (already redacted) output.
    pub fn classify(err: &GitError) -> Self {
        let text = match err {
            GitError::Failed { stdout, stderr, .. } => format!("{}\n{}", stdout, stderr),
            GitError::Spawn { .. } => return PushRejection::Other,
        }
        .to_ascii_lowercase();

        const NON_FAST_FORWARD: &[&str] = &["non-fast-forward", "fetch first", "stale info"];
        const AUTH: &[&str] = &[
            "authentication failed",
            "could not read username",
            "terminal prompts disabled",
            "permission denied",
            "403",
            "401",
        ];
        const NETWORK: &[&str] = &[
            "could not resolve host",
            "connection refused",
            "connection timed out",
            "operation timed out",
            "network is unreachable",
            "unable to access",
        ];

        let hit = |needles: &[&str]| needles.iter().any(|n| text.contains(n));
        if hit(NON_FAST_FORWARD) {
            PushRejection::NonFastForward
        } else if hit(AUTH) {
            PushRejection::Auth
        } else if hit(NETWORK) {
            PushRejection::Network
        } else {
            PushRejection::Other
        }
    }

    /// Human-readable part of a failed push. `--porcelain` reports ref
    /// rejections on stdout, so fall back to it when stderr is empty.
    pub fn detail(err: &GitError) -> String {
        match err {
            GitError::Failed { stdout, stderr, .. } if stderr.is_empty() => stdout.clone(),
            other => other.to_string(),
        }
    }

    /// A non-fast-forward push needs a new decision against the moved tip;
    /// the rest may clear up on their own.
    pub fn retry_safe(&self) -> bool {
        !matches!(self, PushRejection::NonFastForward)
    }
}

impl fmt::Display for PushRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PushRejection::NonFastForward => "non-fast-forward",
            PushRejection::Auth => "authentication",
            PushRejection::Network => "network",
            PushRejection::Other => "rejected",
        };
        f.write_str(s)
    }
}

/// One commit as an approver sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub hash: String,
    pub subject: String,

    /// `Name <email>`.
    pub author: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authored_at: Option<DateTime<Utc>>,

    /// Carries the pipeline marker trailer.
    pub system_authored: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    /// Commit this one reverts, for pipeline revert commits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverts: Option<String>,

    pub changed_files: Vec<String>,
}

/// Commit-level git operations against the workspace clone.
pub struct GitAdapter {
    git: Git,
    commit: CommitConfig,
}

impl GitAdapter {
    pub fn new(git: Git, commit: CommitConfig) -> Self {
        Self { git, commit }
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    pub fn head(&self) -> Result<String, GitError> {
        self.git.run(&["rev-parse", "HEAD"])
    }

    /// Full message of the HEAD commit.
    pub fn head_message(&self) -> Result<String, GitError> {
        self.git.run(&["log", "-1", "--format=%B", "HEAD"])
    }

    pub fn head_subject(&self) -> Result<String, GitError> {
        self.git.run(&["log", "-1", "--format=%s", "HEAD"])
    }

    /// Every path that differs from HEAD, staged or not, untracked included.
    pub fn changed_paths_on_disk(&self) -> Result<Vec<String>, GitError> {
        let raw = self
            .git
            .run_raw(&["status", "--porcelain", "-z", "--untracked-files=all"])?;

        let mut paths = Vec::new();
        let mut entries = raw.split('\0').filter(|e| !e.is_empty());
        while let Some(entry) = entries.next() {
            if entry.len() < 4 {
                continue;
            }
            let (status, path) = entry.split_at(3);
            paths.push(path.to_string());
            // Renames and copies are followed by their source path.
            if status.starts_with('R') || status.starts_with('C') {
                entries.next();
            }
        }
        Ok(paths)
    }

    /// Stage additions, modifications, and deletions under `paths`.
    ///
    /// Forced: the paths were named explicitly by the change set, so an
    /// ignore rule in the remote does not get to drop them.
    pub fn stage(&self, paths: &[String]) -> Result<(), GitError> {
        let mut args = vec!["add", "-A", "-f", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.git.run(&args).map(|_| ())
    }

    pub fn has_staged_changes(&self) -> Result<bool, GitError> {
        Ok(!self.git.succeeds(&["diff", "--cached", "--quiet"])?)
    }

    /// Commit the index with the configured identity. Returns the new HEAD.
    pub fn commit(&self, message: &str) -> Result<String, GitError> {
        let name = format!("user.name={}", self.commit.author_name);
        let email = format!("user.email={}", self.commit.author_email);
        self.git.run(&[
            "-c",
            &name,
            "-c",
            &email,
            "commit",
            "--quiet",
            "--no-verify",
            "--cleanup=whitespace",
            "-m",
            message,
        ])?;
        self.head()
    }

    /// Move HEAD back one commit, leaving its changes in the working tree.
    pub fn reset_to_parent(&self) -> Result<(), GitError> {
        self.git.run(&["reset", "--quiet", "HEAD~1"]).map(|_| ())
    }

    pub fn exists_in_head(&self, path: &str) -> Result<bool, GitError> {
        self.git.succeeds(&["cat-file", "-e", &format!("HEAD:{}", path)])
    }

    /// Restore `path` in the index and working tree from HEAD.
    pub fn checkout_from_head(&self, path: &str) -> Result<(), GitError> {
        self.git.run(&["checkout", "HEAD", "--", path]).map(|_| ())
    }

    /// Stage the inverse of HEAD without committing.
    pub fn revert_head_no_commit(&self) -> Result<(), GitError> {
        self.git.run(&["revert", "--no-commit", "HEAD"]).map(|_| ())
    }

    /// The newest `limit` commits reachable from `rev`, newest first.
    pub fn history(&self, rev: &str, limit: usize) -> Result<Vec<CommitInfo>, GitError> {
        let max_count = format!("--max-count={}", limit);
        self.git
            .run(&["rev-list", &max_count, rev])?
            .lines()
            .filter(|hash| !hash.is_empty())
            .map(|hash| self.commit_info(hash))
            .collect()
    }

    fn commit_info(&self, hash: &str) -> Result<CommitInfo, GitError> {
        let raw = self
            .git
            .run_raw(&["show", "-s", "--format=%an <%ae>%x00%aI%x00%B", hash])?;
        let mut fields = raw.splitn(3, '\0');
        let author = fields.next().unwrap_or_default().trim().to_string();
        let authored_at = fields
            .next()
            .and_then(|t| DateTime::parse_from_rfc3339(t.trim()).ok())
            .map(|t| t.with_timezone(&Utc));
        let message = fields.next().unwrap_or_default().trim();
        let marker = parse_commit_message(message);

        let changed_files = self
            .git
            .run_raw(&[
                "diff-tree",
                "-z",
                "--no-commit-id",
                "--name-only",
                "-r",
                "--root",
                hash,
            ])?
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        Ok(CommitInfo {
            hash: hash.to_string(),
            subject: message.lines().next().unwrap_or_default().to_string(),
            author,
            authored_at,
            system_authored: marker.system_authored,
            workflow_id: marker.workflow_id,
            reverts: marker.reverts,
            changed_files,
        })
    }

    /// Push HEAD to `branch` on origin. Never forced.
    pub fn push(&self, branch: &str) -> Result<(), GitError> {
        let refspec = format!("HEAD:refs/heads/{}", branch);
        self.git
            .run(&["push", "--porcelain", "origin", &refspec])
            .map(|_| ())
    }
}
