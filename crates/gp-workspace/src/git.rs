// git.rs — git process runner and remote description.
//
// All git interaction goes through the `git` binary. Output that ends up
// in an error is passed through a Redactor first so the remote credential
// never leaks into logs, HTTP responses, or workflow failure reasons.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from running git.
#[derive(Debug, Error)]
pub enum GitError {
    /// The git process could not be started.
    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// git exited unsuccessfully. Output is already redacted.
    #[error("git {command} failed (exit {code}): {stderr}")]
    Failed {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },
}

impl GitError {
    /// Redacted stderr of a failed command (empty for spawn errors).
    pub fn stderr(&self) -> &str {
        match self {
            GitError::Failed { stderr, .. } => stderr,
            GitError::Spawn { .. } => "",
        }
    }
}

fn userinfo_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?P<scheme>[A-Za-z][A-Za-z0-9+.\-]*://)[^/@\s]+@")
            .expect("userinfo pattern is valid")
    })
}

/// Masks secrets in text that is about to leave the process.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mask every occurrence of `secret` (ignored if blank).
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.trim().is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    /// Replace known secrets and any URL userinfo with `***`.
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            out = out.replace(secret.as_str(), "***");
        }
        userinfo_pattern()
            .replace_all(&out, "${scheme}***@")
            .into_owned()
    }
}

/// The authoritative remote: where to clone from and push to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSpec {
    pub url: String,

    /// Auth token. Never serialized.
    #[serde(default, skip_serializing)]
    pub credential: Option<String>,

    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

impl RemoteSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credential: None,
            branch: default_branch(),
        }
    }

    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Clone URL with the credential injected as HTTPS userinfo. Non-HTTPS
    /// URLs (ssh, local paths) are returned unchanged.
    pub fn authenticated_url(&self) -> String {
        match (&self.credential, self.url.strip_prefix("https://")) {
            (Some(token), Some(rest)) if !rest.contains('@') => {
                format!("https://{}@{}", token, rest)
            }
            _ => self.url.clone(),
        }
    }

    /// Redactor that masks this remote's credential.
    pub fn redactor(&self) -> Redactor {
        match &self.credential {
            Some(token) => Redactor::new().with_secret(token.clone()),
            None => Redactor::new(),
        }
    }
}

/// Runs git in a fixed working directory.
#[derive(Debug, Clone)]
pub struct Git {
    work_dir: PathBuf,
    redactor: Redactor,
}

impl Git {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            redactor: Redactor::new(),
        }
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Run git and return trimmed stdout.
    pub fn run(&self, args: &[&str]) -> Result<String, GitError> {
        Ok(self.run_raw(args)?.trim().to_string())
    }

    /// Run git and return stdout untouched (for `-z` output).
    pub fn run_raw(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(args)?;
        if !output.status.success() {
            return Err(self.failure(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run git and report only whether it exited successfully. Used for
    /// checks like `diff --quiet` and `cat-file -e`.
    pub fn succeeds(&self, args: &[&str]) -> Result<bool, GitError> {
        Ok(self.output(args)?.status.success())
    }

    fn output(&self, args: &[&str]) -> Result<Output, GitError> {
        tracing::debug!(
            dir = %self.work_dir.display(),
            "git {}",
            self.redactor.redact(&args.join(" "))
        );
        Command::new("git")
            .args(args)
            .current_dir(&self.work_dir)
            // Never block on a credential prompt; fail instead.
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .output()
            .map_err(|source| GitError::Spawn {
                command: self.redactor.redact(&args.join(" ")),
                source,
            })
    }

    fn failure(&self, args: &[&str], output: &Output) -> GitError {
        GitError::Failed {
            command: self.redactor.redact(&args.join(" ")),
            code: output.status.code().unwrap_or(-1),
            stdout: self
                .redactor
                .redact(String::from_utf8_lossy(&output.stdout).trim()),
            stderr: self
                .redactor
                .redact(String::from_utf8_lossy(&output.stderr).trim()),
        }
    }
}
