// registry.rs — WorkflowRegistry: process-lifetime workflow state.
//
// The registry is the single source of truth for workflow state. It is held
// in memory only; nothing survives a restart. Updates run against a clone
// and are only committed when the closure succeeds, so a rejected
// transition never leaves a half-updated record behind.
//
// The registry also tracks the most recent system-authored publish across
// all workflows ("last publish"), which the revert path consumes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::WorkflowError;
use crate::events::{EventDispatcher, PipelineEvent};
use crate::workflow::{PublishRecord, Workflow};

/// In-memory registry of workflows keyed by id.
pub struct WorkflowRegistry {
    workflows: Mutex<HashMap<String, Workflow>>,
    last_publish: Mutex<Option<PublishRecord>>,
    dispatcher: EventDispatcher,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::with_dispatcher(EventDispatcher::new())
    }

    pub fn with_dispatcher(dispatcher: EventDispatcher) -> Self {
        Self {
            workflows: Mutex::new(HashMap::new()),
            last_publish: Mutex::new(None),
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Register a new workflow. Ids must be unique for the process lifetime
    /// of the record.
    pub fn create(&self, workflow: Workflow) -> Result<Workflow, WorkflowError> {
        {
            let mut map = self.workflows();
            if map.contains_key(&workflow.id) {
                return Err(WorkflowError::Duplicate(workflow.id));
            }
            map.insert(workflow.id.clone(), workflow.clone());
        }
        self.dispatcher.dispatch(&PipelineEvent::workflow_created(
            &workflow.id,
            &workflow.description,
        ));
        Ok(workflow)
    }

    /// Snapshot of a workflow.
    pub fn get(&self, id: &str) -> Result<Workflow, WorkflowError> {
        self.workflows()
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))
    }

    /// All workflows, newest first.
    pub fn list(&self) -> Vec<Workflow> {
        let mut all: Vec<Workflow> = self.workflows().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Apply `f` to a workflow and store the result if it succeeds.
    ///
    /// Returns the updated snapshot. A state change emits a
    /// `state_changed` event after the registry lock is released.
    pub fn update<F>(&self, id: &str, f: F) -> Result<Workflow, WorkflowError>
    where
        F: FnOnce(&mut Workflow) -> Result<(), WorkflowError>,
    {
        let (before, after) = {
            let mut map = self.workflows();
            let stored = map
                .get_mut(id)
                .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
            let before = stored.state.clone();
            let mut next = stored.clone();
            f(&mut next)?;
            *stored = next.clone();
            (before, next)
        };

        if before != after.state {
            self.dispatcher
                .dispatch(&PipelineEvent::state_changed(id, &before, &after.state));
        }
        Ok(after)
    }

    /// Remove a workflow from the registry.
    pub fn remove(&self, id: &str) -> Result<Workflow, WorkflowError> {
        let removed = self
            .workflows()
            .remove(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
        self.dispatcher
            .dispatch(&PipelineEvent::workflow_discarded(id));
        Ok(removed)
    }

    /// Remember `record` as the most recent system-authored publish.
    pub fn record_publish(&self, record: PublishRecord) {
        *self.last_publish_slot() = Some(record);
    }

    pub fn last_publish(&self) -> Option<PublishRecord> {
        self.last_publish_slot().clone()
    }

    /// Clear the last-publish pointer, but only if it still names
    /// `remote_ref`. Returns whether it was cleared.
    pub fn clear_last_publish_if(&self, remote_ref: &str) -> bool {
        let mut slot = self.last_publish_slot();
        if slot.as_ref().is_some_and(|r| r.remote_ref == remote_ref) {
            *slot = None;
            return true;
        }
        false
    }

    fn workflows(&self) -> MutexGuard<'_, HashMap<String, Workflow>> {
        self.workflows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_publish_slot(&self) -> MutexGuard<'_, Option<PublishRecord>> {
        self.last_publish
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}
