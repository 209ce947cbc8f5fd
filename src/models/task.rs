use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
        }
    }
}

/// A planned piece of work. Stored as-is in the `tasks` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub client_id: String,
    pub session_id: Option<String>,
    pub title: String,
    /// Always at least one minute.
    pub estimated_minutes: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        client_id: &str,
        title: &str,
        estimated_minutes: u32,
        session_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            session_id,
            title: title.trim().to_string(),
            estimated_minutes: estimated_minutes.max(1),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a validated patch in place.
    pub fn apply(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(minutes) = patch.estimated_minutes {
            self.estimated_minutes = minutes;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        self.updated_at = Utc::now();
    }
}

/// Fields a PATCH may change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub estimated_minutes: Option<u32>,
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.estimated_minutes.is_none() && self.status.is_none()
    }
}
