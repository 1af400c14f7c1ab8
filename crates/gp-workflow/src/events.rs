// events.rs — Pipeline lifecycle events and notification dispatch.
//
// The pipeline emits events at every state change and at the points an
// approval UI cares about (checkpoint ready, published, reverted). Sinks
// observe; a failing sink never blocks the pipeline.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::workflow::{Checkpoint, PublishRecord, WorkflowState};

/// Events emitted at key pipeline points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A new workflow was registered.
    WorkflowCreated {
        workflow_id: String,
        description: String,
        timestamp: DateTime<Utc>,
    },

    /// A workflow changed state.
    StateChanged {
        workflow_id: String,
        from_state: String,
        to_state: String,
        timestamp: DateTime<Utc>,
    },

    /// A checkpoint is waiting for a decision.
    CheckpointCreated {
        workflow_id: String,
        checkpoint_ref: String,
        files: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A checkpoint reached the remote.
    Published {
        workflow_id: String,
        remote_ref: String,
        timestamp: DateTime<Utc>,
    },

    /// The last publish was reverted on the remote.
    Reverted {
        reverted_ref: String,
        revert_ref: String,
        timestamp: DateTime<Utc>,
    },

    /// An abandoned workflow was removed from the registry.
    WorkflowDiscarded {
        workflow_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Get the event type name as a string.
    pub fn event_type(&self) -> &str {
        match self {
            PipelineEvent::WorkflowCreated { .. } => "workflow_created",
            PipelineEvent::StateChanged { .. } => "state_changed",
            PipelineEvent::CheckpointCreated { .. } => "checkpoint_created",
            PipelineEvent::Published { .. } => "published",
            PipelineEvent::Reverted { .. } => "reverted",
            PipelineEvent::WorkflowDiscarded { .. } => "workflow_discarded",
        }
    }

    pub fn workflow_created(workflow_id: &str, description: &str) -> Self {
        PipelineEvent::WorkflowCreated {
            workflow_id: workflow_id.to_string(),
            description: description.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn state_changed(workflow_id: &str, from: &WorkflowState, to: &WorkflowState) -> Self {
        PipelineEvent::StateChanged {
            workflow_id: workflow_id.to_string(),
            from_state: from.to_string(),
            to_state: to.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn checkpoint_created(workflow_id: &str, checkpoint: &Checkpoint) -> Self {
        PipelineEvent::CheckpointCreated {
            workflow_id: workflow_id.to_string(),
            checkpoint_ref: checkpoint.checkpoint_ref.clone(),
            files: checkpoint.files.iter().map(|f| f.path.clone()).collect(),
            timestamp: Utc::now(),
        }
    }

    pub fn published(workflow_id: &str, record: &PublishRecord) -> Self {
        PipelineEvent::Published {
            workflow_id: workflow_id.to_string(),
            remote_ref: record.remote_ref.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn reverted(reverted_ref: &str, revert: &PublishRecord) -> Self {
        PipelineEvent::Reverted {
            reverted_ref: reverted_ref.to_string(),
            revert_ref: revert.remote_ref.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn workflow_discarded(workflow_id: &str) -> Self {
        PipelineEvent::WorkflowDiscarded {
            workflow_id: workflow_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives pipeline events.
pub trait NotificationSink: Send + Sync {
    fn send(&self, event: &PipelineEvent) -> Result<(), WorkflowError>;
}

/// Appends events as JSONL to a file.
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl NotificationSink for LogSink {
    fn send(&self, event: &PipelineEvent) -> Result<(), WorkflowError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| WorkflowError::IoError {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| WorkflowError::IoError {
                path: self.path.display().to_string(),
                source,
            })?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json).map_err(|source| WorkflowError::IoError {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(())
    }
}

/// Emits events as structured tracing records.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn send(&self, event: &PipelineEvent) -> Result<(), WorkflowError> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(event_type = event.event_type(), %payload, "pipeline event");
        Ok(())
    }
}

/// Dispatches events to multiple sinks.
///
/// Errors from individual sinks are logged but don't prevent other sinks
/// from receiving the event.
pub struct EventDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn dispatch(&self, event: &PipelineEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!("notification sink error: {}", e);
            }
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn send(&self, _event: &PipelineEvent) -> Result<(), WorkflowError> {
            Err(WorkflowError::NotificationError("sink offline".to_string()))
        }
    }

    #[test]
    fn event_type_tag_is_serialized() {
        let event = PipelineEvent::workflow_created("w1", "add a.txt");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"workflow_created\""));
        assert_eq!(event.event_type(), "workflow_created");
    }

    #[test]
    fn log_sink_appends_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/events.jsonl");
        let sink = LogSink::new(&path);

        sink.send(&PipelineEvent::workflow_created("w1", "one")).unwrap();
        sink.send(&PipelineEvent::state_changed(
            "w1",
            &WorkflowState::Initialized,
            &WorkflowState::ChangesApplied,
        ))
        .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"to_state\":\"changes_applied\""));
    }

    #[test]
    fn failing_sink_does_not_block_others() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(FailingSink));
        dispatcher.add_sink(Box::new(LogSink::new(&path)));
        assert_eq!(dispatcher.sink_count(), 2);

        dispatcher.dispatch(&PipelineEvent::workflow_discarded("w2"));

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("workflow_discarded"));
    }
}
