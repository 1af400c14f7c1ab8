//! Validation oracle seam.
//!
//! The pipeline treats validation as an opaque judgment over the applied
//! change set. Only an explicit [`Verdict::Pass`] lets a workflow proceed;
//! `Fail` and `Partial` both end it.

use std::fmt;
use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use serde_json::json;

use gp_workflow::ChangedPaths;

/// Characters of stdout/stderr (from the end) kept in command oracle details.
const OUTPUT_TAIL: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Partial,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Partial => "partial",
        })
    }
}

/// An oracle's answer. `details` is forwarded, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ValidationReport {
    pub fn pass(details: Option<serde_json::Value>) -> Self {
        Self {
            verdict: Verdict::Pass,
            details,
        }
    }

    pub fn fail(details: Option<serde_json::Value>) -> Self {
        Self {
            verdict: Verdict::Fail,
            details,
        }
    }

    pub fn partial(details: Option<serde_json::Value>) -> Self {
        Self {
            verdict: Verdict::Partial,
            details,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// Judges an applied change set.
pub trait ValidationOracle: Send + Sync {
    fn name(&self) -> &str;

    /// `workspace` is the clone with the change set applied.
    fn validate(
        &self,
        workspace: &Path,
        workflow_id: &str,
        changed_paths: &ChangedPaths,
    ) -> ValidationReport;
}

/// Passes everything. Used when no validation command is configured.
pub struct AcceptAllOracle;

impl ValidationOracle for AcceptAllOracle {
    fn name(&self) -> &str {
        "accept-all"
    }

    fn validate(&self, _: &Path, _: &str, _: &ChangedPaths) -> ValidationReport {
        ValidationReport::pass(None)
    }
}

/// Runs a command inside the workspace; exit status 0 passes.
///
/// The command sees `GP_WORKFLOW_ID` and `GP_CHANGED_PATHS` (newline
/// separated) in its environment.
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
}

impl CommandOracle {
    /// `None` if `command` is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl ValidationOracle for CommandOracle {
    fn name(&self) -> &str {
        "command"
    }

    fn validate(
        &self,
        workspace: &Path,
        workflow_id: &str,
        changed_paths: &ChangedPaths,
    ) -> ValidationReport {
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(workspace)
            .env("GP_WORKFLOW_ID", workflow_id)
            .env("GP_CHANGED_PATHS", changed_paths.as_slice().join("\n"))
            .output();

        let output = match output {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(command = %self.command_line(), error = %e, "validation command did not start");
                return ValidationReport::fail(Some(json!({
                    "command": self.command_line(),
                    "error": e.to_string(),
                })));
            }
        };

        let details = json!({
            "command": self.command_line(),
            "exit_code": output.status.code(),
            "stdout_tail": tail(&output.stdout),
            "stderr_tail": tail(&output.stderr),
        });
        tracing::info!(
            workflow_id = %workflow_id,
            command = %self.command_line(),
            success = output.status.success(),
            "validation command finished"
        );
        if output.status.success() {
            ValidationReport::pass(Some(details))
        } else {
            ValidationReport::fail(Some(details))
        }
    }
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_end();
    match text.char_indices().rev().nth(OUTPUT_TAIL.saturating_sub(1)) {
        Some((start, _)) => text[start..].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn paths() -> ChangedPaths {
        ["a.txt", "b/c.txt"].into_iter().collect()
    }

    fn sh(script: &str) -> CommandOracle {
        CommandOracle::new(&["sh".to_string(), "-c".to_string(), script.to_string()]).unwrap()
    }

    #[test]
    fn only_pass_is_pass() {
        assert!(ValidationReport::pass(None).is_pass());
        assert!(!ValidationReport::fail(None).is_pass());
        assert!(!ValidationReport::partial(None).is_pass());
    }

    #[test]
    fn accept_all_passes() {
        let dir = tempdir().unwrap();
        assert!(AcceptAllOracle.validate(dir.path(), "w", &paths()).is_pass());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandOracle::new(&[]).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn command_exit_status_decides() {
        let dir = tempdir().unwrap();
        let report = sh("echo checking $GP_WORKFLOW_ID").validate(dir.path(), "w42", &paths());
        assert!(report.is_pass());
        let details = report.details.unwrap();
        assert_eq!(details["exit_code"], 0);
        assert_eq!(details["stdout_tail"], "checking w42");

        let report = sh("echo broken >&2; exit 3").validate(dir.path(), "w", &paths());
        assert_eq!(report.verdict, Verdict::Fail);
        let details = report.details.unwrap();
        assert_eq!(details["exit_code"], 3);
        assert_eq!(details["stderr_tail"], "broken");
    }

    #[cfg(unix)]
    #[test]
    fn command_sees_changed_paths_and_runs_in_workspace() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let report = sh("test -f a.txt && test \"$GP_CHANGED_PATHS\" = \"$(printf 'a.txt\\nb/c.txt')\"")
            .validate(dir.path(), "w", &paths());
        assert!(report.is_pass(), "{:?}", report);
    }

    #[test]
    fn missing_program_fails() {
        let dir = tempdir().unwrap();
        let oracle = CommandOracle::new(&["gp-no-such-program-xyz".to_string()]).unwrap();
        let report = oracle.validate(dir.path(), "w", &paths());
        assert_eq!(report.verdict, Verdict::Fail);
        assert!(report.details.unwrap()["error"].is_string());
    }

    #[test]
    fn tail_keeps_the_end() {
        let long = "x".repeat(OUTPUT_TAIL) + "END";
        let t = tail(long.as_bytes());
        assert_eq!(t.chars().count(), OUTPUT_TAIL);
        assert!(t.ends_with("END"));
        assert_eq!(tail(b"short\n"), "short");

        // Counted in characters, so multi-byte output is never split.
        let wide = "é".repeat(OUTPUT_TAIL + 10);
        let t = tail(wide.as_bytes());
        assert_eq!(t.chars().count(), OUTPUT_TAIL);
        assert_eq!(t.len(), OUTPUT_TAIL * 2);
    }
}
