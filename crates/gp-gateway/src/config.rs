// config.rs — Pipeline configuration.
//
// PipelineConfig is read from a TOML file and then patched from the
// environment (GP_REMOTE_URL, GP_REMOTE_CREDENTIAL, GP_WORKSPACE_PATH).
// remote.url and workspace.path are required after overrides; everything
// else has a default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gp_submit::CommitConfig;
use gp_workspace::{RemovalPolicy, RemoteSpec};

pub const ENV_REMOTE_URL: &str = "GP_REMOTE_URL";
pub const ENV_REMOTE_CREDENTIAL: &str = "GP_REMOTE_CREDENTIAL";
pub const ENV_WORKSPACE_PATH: &str = "GP_WORKSPACE_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteSection {
    /// Clone/push target.
    #[serde(default)]
    pub url: Option<String>,

    /// Auth token. Never written back out.
    #[serde(default, skip_serializing)]
    pub credential: Option<String>,

    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSection {
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_removal_attempts")]
    pub removal_attempts: usize,

    #[serde(default = "default_removal_backoff_ms")]
    pub removal_backoff_ms: u64,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            path: None,
            removal_attempts: default_removal_attempts(),
            removal_backoff_ms: default_removal_backoff_ms(),
        }
    }
}

fn default_removal_attempts() -> usize {
    3
}

fn default_removal_backoff_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSection {
    /// Program and arguments run inside the workspace. Absent = accept all.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsSection {
    /// JSONL event log.
    #[serde(default)]
    pub log: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// Top-level configuration for the pipeline and its daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub remote: RemoteSection,

    #[serde(default)]
    pub workspace: WorkspaceSection,

    #[serde(default)]
    pub commit: CommitConfig,

    #[serde(default)]
    pub validation: ValidationSection,

    #[serde(default)]
    pub events: EventsSection,

    #[serde(default)]
    pub server: ServerSection,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read `path`, apply environment overrides, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Configuration from the environment alone (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v: &String| !v.trim().is_empty());
        if let Some(url) = get(ENV_REMOTE_URL) {
            self.remote.url = Some(url);
        }
        if let Some(credential) = get(ENV_REMOTE_CREDENTIAL) {
            self.remote.credential = Some(credential);
        }
        if let Some(path) = get(ENV_WORKSPACE_PATH) {
            self.workspace.path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.remote_spec()?;
        self.workspace_path()?;
        if let Some(command) = &self.validation.command {
            if command.first().map_or(true, |p| p.trim().is_empty()) {
                return Err(ConfigError::Invalid {
                    field: "validation.command",
                    reason: "must name a program".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn remote_spec(&self) -> Result<RemoteSpec, ConfigError> {
        let url = self
            .remote
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(ConfigError::Missing("remote.url"))?;
        let mut spec = RemoteSpec::new(url).with_credential(self.remote.credential.clone());
        if let Some(branch) = &self.remote.branch {
            if branch.trim().is_empty() || branch.contains(char::is_whitespace) {
                return Err(ConfigError::Invalid {
                    field: "remote.branch",
                    reason: format!("'{}' is not a branch name", branch),
                });
            }
            spec = spec.with_branch(branch.clone());
        }
        Ok(spec)
    }

    pub fn workspace_path(&self) -> Result<PathBuf, ConfigError> {
        self.workspace
            .path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::Missing("workspace.path"))
    }

    pub fn removal_policy(&self) -> RemovalPolicy {
        RemovalPolicy::escalating(
            self.workspace.removal_attempts,
            Duration::from_millis(self.workspace.removal_backoff_ms),
        )
    }
}
