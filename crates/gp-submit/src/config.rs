//! Commit identity configuration

use serde::{Deserialize, Serialize};

/// Identity used for every commit the pipeline creates.
///
/// Passed per-invocation (`git -c user.name=...`), so fresh clones need no
/// global git configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitConfig {
    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

fn default_author_name() -> String {
    "Gated Publish".to_string()
}

fn default_author_email() -> String {
    "gated-publish@localhost".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: CommitConfig = serde_json::from_str(r#"{"author_name": "Bot"}"#).unwrap();
        assert_eq!(config.author_name, "Bot");
        assert_eq!(config.author_email, "gated-publish@localhost");
    }
}
