// file: src/pipeline/registry.rs
// description: in-memory task status store polled by clients
// reference: shared state behind a single process-wide lock

use crate::error::{PipelineError, Result};
use crate::models::{TaskRecord, TaskUpdate};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Progressive task records keyed by task id. Records live for the whole
/// process and are never removed.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, TaskRecord>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a task in PROCESSING. Creating an existing id resets it.
    pub fn create(&self, task_id: &str) {
        self.guard()
            .insert(task_id.to_string(), TaskRecord::new(task_id));
        debug!("Task {} created", task_id);
    }

    /// Applies `update` atomically. Unknown ids and finished tasks are left
    /// untouched.
    pub fn update(&self, task_id: &str, update: TaskUpdate) {
        let mut tasks = self.guard();
        let Some(record) = tasks.get_mut(task_id) else {
            debug!("Ignoring update for unknown task {}", task_id);
            return;
        };

        if record.status.is_terminal() {
            debug!(
                "Ignoring update for task {} already {}",
                task_id,
                record.status.as_str()
            );
            return;
        }

        if let Some(phrases) = update.phrases {
            record.phrases = phrases;
        }
        if let Some(image) = update.image {
            record.images.push(image);
        }
        if let Some(inline) = update.image_inline {
            record.images_inline.push(inline);
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(error) = update.error {
            record.error = Some(error);
        }
        if let Some(index) = update.product_index {
            record.product_index = Some(index);
        }
    }

    pub fn get(&self, task_id: &str) -> Result<TaskRecord> {
        self.guard()
            .get(task_id)
            .cloned()
            .ok_or_else(|| PipelineError::TaskNotFound(task_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
