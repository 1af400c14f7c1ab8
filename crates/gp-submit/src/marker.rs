//! Commit message format and the system-authored marker.
//!
//! Layout:
//!
//! ```text
//! <first line of the description>
//!
//! Files changed:
//! - a.txt
//! - src/b.txt
//!
//! Pipeline-Marker: gated-publish/v1
//! Pipeline-Workflow: <workflow id>
//! Pipeline-Annotation: {"workflow_id":...}
//! ```
//!
//! Trailers live in the final paragraph. Only a commit whose final
//! paragraph carries the exact marker line counts as system-authored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gp_workflow::{Annotation, ChangedPaths};

pub const MARKER_KEY: &str = "Pipeline-Marker";
pub const MARKER_VALUE: &str = "gated-publish/v1";
pub const WORKFLOW_KEY: &str = "Pipeline-Workflow";
pub const ANNOTATION_KEY: &str = "Pipeline-Annotation";
pub const REVERTS_KEY: &str = "Pipeline-Reverts";

const LISTED_FILES: usize = 10;
const SUBJECT_LIMIT: usize = 72;

/// Machine-readable provenance embedded in a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitAnnotation {
    pub workflow_id: String,
    pub description: String,
    pub changed_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl CommitAnnotation {
    pub fn new(workflow_id: &str, annotation: &Annotation, paths: &ChangedPaths) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            description: annotation.description.clone(),
            changed_paths: paths.as_slice().to_vec(),
            risk_assessment: annotation.risk_assessment.clone(),
            validation_details: annotation.validation_details.clone(),
            created_at: Utc::now(),
        }
    }
}

/// What was found in a commit's trailers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMarker {
    pub system_authored: bool,
    pub workflow_id: Option<String>,
    pub annotation: Option<CommitAnnotation>,
    pub reverts: Option<String>,
}

/// Render the message for a checkpoint or publish commit.
///
/// `note` is an optional extra body line (e.g. checkpoint status).
pub fn render_commit_message(
    annotation: &CommitAnnotation,
    note: Option<&str>,
) -> Result<String, serde_json::Error> {
    let mut message = subject(&annotation.description);
    message.push_str("\n\n");

    if let Some(note) = note {
        message.push_str(note);
        message.push_str("\n\n");
    }

    message.push_str("Files changed:\n");
    for path in annotation.changed_paths.iter().take(LISTED_FILES) {
        message.push_str(&format!("- {}\n", path));
    }
    if annotation.changed_paths.len() > LISTED_FILES {
        message.push_str(&format!(
            "... and {} more\n",
            annotation.changed_paths.len() - LISTED_FILES
        ));
    }

    message.push_str(&format!(
        "\n{}: {}\n{}: {}\n{}: {}\n",
        MARKER_KEY,
        MARKER_VALUE,
        WORKFLOW_KEY,
        single_line(&annotation.workflow_id),
        ANNOTATION_KEY,
        serde_json::to_string(annotation)?
    ));
    Ok(message)
}

/// Render the message for a revert of `reverted_ref`.
pub fn render_revert_message(reverted_ref: &str, reverted_subject: &str) -> String {
    let subject = subject(&format!("Revert \"{}\"", reverted_subject.trim()));
    format!(
        "{}\n\nThis reverts commit {}.\n\n{}: {}\n{}: {}\n",
        subject, reverted_ref, MARKER_KEY, MARKER_VALUE, REVERTS_KEY, reverted_ref
    )
}

/// Parse the trailers of a commit message.
pub fn parse_commit_message(message: &str) -> ParsedMarker {
    let mut parsed = ParsedMarker::default();
    let Some(trailers) = message
        .trim_end()
        .rsplit("\n\n")
        .next()
        .filter(|p| !p.trim().is_empty())
    else {
        return parsed;
    };

    for line in trailers.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            MARKER_KEY => parsed.system_authored |= value == MARKER_VALUE,
            WORKFLOW_KEY => parsed.workflow_id = Some(value.to_string()),
            ANNOTATION_KEY => parsed.annotation = serde_json::from_str(value).ok(),
            REVERTS_KEY => parsed.reverts = Some(value.to_string()),
            _ => {}
        }
    }
    parsed
}

/// Whether a commit message carries the system-authored marker.
pub fn is_system_authored(message: &str) -> bool {
    parse_commit_message(message).system_authored
}

fn subject(description: &str) -> String {
    let first = description.lines().map(str::trim).find(|l| !l.is_empty());
    let Some(first) = first else {
        return "Automated change".to_string();
    };
    if first.chars().count() <= SUBJECT_LIMIT {
        return first.to_string();
    }
    let truncated: String = first.chars().take(SUBJECT_LIMIT - 3).collect();
    format!("{}...", truncated.trim_end())
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn annotation(paths: usize) -> CommitAnnotation {
        CommitAnnotation {
            workflow_id: "w1".to_string(),
            description: "Add greeting\n\nLonger explanation".to_string(),
            changed_paths: (0..paths).map(|i| format!("f{}.txt", i)).collect(),
            risk_assessment: Some(json!({"risk": "low", "confidence": 0.85})),
            validation_details: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rendered_message_parses_back() {
        let ann = annotation(2);
        let msg = render_commit_message(&ann, Some("Awaiting approval")).unwrap();
        assert!(msg.starts_with("Add greeting\n\nAwaiting approval\n\nFiles changed:\n- f0.txt\n"));

        let parsed = parse_commit_message(&msg);
        assert!(parsed.system_authored);
        assert_eq!(parsed.workflow_id.as_deref(), Some("w1"));
        assert_eq!(parsed.annotation.unwrap(), ann);
        assert!(parsed.reverts.is_none());
    }

    #[test]
    fn long_file_lists_are_truncated() {
        let msg = render_commit_message(&annotation(13), None).unwrap();
        assert!(msg.contains("- f9.txt\n... and 3 more\n"));
        assert!(!msg.contains("- f10.txt"));
    }

    #[test]
    fn marker_outside_trailer_block_does_not_count() {
        let msg = "Sneaky\n\nPipeline-Marker: gated-publish/v1\n\nSigned-off-by: someone";
        assert!(!is_system_authored(msg));
    }

    #[test]
    fn wrong_marker_value_does_not_count() {
        assert!(!is_system_authored("Subject\n\nPipeline-Marker: something-else\n"));
        assert!(!is_system_authored("Plain human commit"));
        assert!(!is_system_authored(""));
    }

    #[test]
    fn revert_message_is_system_authored() {
        let msg = render_revert_message("abc123", "Add greeting");
        assert!(msg.starts_with("Revert \"Add greeting\"\n"));
        let parsed = parse_commit_message(&msg);
        assert!(parsed.system_authored);
        assert_eq!(parsed.reverts.as_deref(), Some("abc123"));
    }

    #[test]
    fn subject_is_trimmed_and_bounded() {
        assert_eq!(subject("  \n  hello  \nworld"), "hello");
        assert_eq!(subject(""), "Automated change");
        let long = "x".repeat(100);
        let s = subject(&long);
        assert_eq!(s.chars().count(), SUBJECT_LIMIT);
        assert!(s.ends_with("..."));
    }
}
