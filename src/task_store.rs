//! In-process task status registry (SPEC_FULL.md §6) backing
//! `GET /api/v1/task/{task_id}`. Not part of the Coordination Store —
//! task status is local bookkeeping for the HTTP front-end, not
//! cross-worker coordination state, so it lives in a plain in-memory
//! map rather than going through `cs::CoordinationStore`.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::orchestrator::TaskOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    ManagingModel,
    Streaming,
    Success,
    Failure,
    Retry,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub result: Option<String>,
}

#[derive(Default)]
pub struct TaskStore {
    records: Mutex<HashMap<String, TaskRecord>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, task_id: &str) {
        self.records.lock().unwrap().insert(
            task_id.to_string(),
            TaskRecord { task_id: task_id.to_string(), status: TaskStatus::Queued, result: None },
        );
    }

    pub fn set_status(&self, task_id: &str, status: TaskStatus) {
        if let Some(record) = self.records.lock().unwrap().get_mut(task_id) {
            record.status = status;
        }
    }

    pub fn complete(&self, task_id: &str, outcome: &TaskOutcome) {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(task_id) else { return };
        match outcome {
            TaskOutcome::Success { chunks } => {
                record.status = TaskStatus::Success;
                record.result = Some(format!("{chunks} chunks streamed"));
            }
            TaskOutcome::Failed { reason } => {
                record.status = TaskStatus::Failure;
                record.result = Some(reason.clone());
            }
        }
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.records.lock().unwrap().get(task_id).cloned()
    }
}
