// file: src/models/task.rs
// description: task status records exposed to polling clients
// reference: internal data structures

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub phrases: Vec<String>,
    pub images: Vec<String>,
    pub images_inline: Vec<String>,
    pub error: Option<String>,
    pub product_index: Option<u64>,
}

impl TaskRecord {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Processing,
            phrases: Vec::new(),
            images: Vec::new(),
            images_inline: Vec::new(),
            error: None,
            product_index: None,
        }
    }
}

/// Partial update applied by `TaskRegistry::update`.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub phrases: Option<Vec<String>>,
    pub image: Option<String>,
    pub image_inline: Option<String>,
    pub status: Option<TaskStatus>,
    pub error: Option<String>,
    pub product_index: Option<u64>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phrases(mut self, phrases: Vec<String>) -> Self {
        self.phrases = Some(phrases);
        self
    }

    pub fn image(mut self, url: impl Into<String>) -> Self {
        self.image = Some(url.into());
        self
    }

    pub fn image_inline(mut self, payload: impl Into<String>) -> Self {
        self.image_inline = Some(payload.into());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn completed() -> Self {
        Self::new().status(TaskStatus::Completed)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let mut update = Self::new().status(TaskStatus::Failed);
        update.error = Some(message.into());
        update
    }

    pub fn product_index(mut self, index: u64) -> Self {
        self.product_index = Some(index);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_processing() {
        let record = TaskRecord::new("abc");
        assert_eq!(record.status, TaskStatus::Processing);
        assert!(record.phrases.is_empty());
        assert!(record.images.is_empty());
        assert!(record.images_inline.is_empty());
        assert!(record.error.is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }

    #[test]
    fn test_failed_update_carries_message() {
        let update = TaskUpdate::failed("boom");
        assert_eq!(update.status, Some(TaskStatus::Failed));
        assert_eq!(update.error.as_deref(), Some("boom"));
    }
}
