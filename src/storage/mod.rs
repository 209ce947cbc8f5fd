//! Persistence seam. Handlers only see `dyn Storage`; MongoDB backs it in
//! production and `MemoryStorage` in tests or single-process runs.

mod memory;
mod mongo;

pub use memory::MemoryStorage;
pub use mongo::MongoStorage;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::{ChatMessage, ChatSession, ConversationState, FlowMode, Task, TaskPatch};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Tasks owned by exactly `client_id`, oldest first.
    async fn list_tasks(&self, client_id: &str) -> Result<Vec<Task>, AppError>;
    async fn get_task(&self, id: &str) -> Result<Option<Task>, AppError>;
    async fn insert_tasks(&self, tasks: &[Task]) -> Result<(), AppError>;
    /// Returns `None` when no task has this id.
    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>, AppError>;

    /// Returns the session with this id, creating it for `owner_id` if it
    /// does not exist yet. Creation is atomic: two racing calls observe the
    /// same record.
    async fn resolve_session(&self, id: &str, owner_id: &str) -> Result<ChatSession, AppError>;
    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, AppError>;
    /// Newest first.
    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<ChatSession>, AppError>;
    async fn finish_session(&self, id: &str) -> Result<(), AppError>;
    /// `None` clears the title. Returns `None` for an unknown session.
    async fn rename_session(
        &self,
        id: &str,
        title: Option<&str>,
    ) -> Result<Option<ChatSession>, AppError>;

    /// Appends to the log and bumps the session's `updated_at`.
    async fn append_message(&self, message: &ChatMessage) -> Result<(), AppError>;
    /// Ordered by creation time.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, AppError>;

    /// Atomic create-if-absent. `mode` only applies to a freshly created state.
    async fn load_or_create_state(
        &self,
        session_id: &str,
        mode: FlowMode,
    ) -> Result<ConversationState, AppError>;
    /// Compare-and-swap on `state.version`. On success the stored version and
    /// `state.version` are both incremented; a stale version is a `Conflict`.
    async fn save_state(&self, state: &mut ConversationState) -> Result<(), AppError>;
    /// Removes the state if it still carries `version`; otherwise `Conflict`.
    async fn delete_state(&self, session_id: &str, version: u64) -> Result<(), AppError>;
}

pub(crate) fn stale_state(session_id: &str) -> AppError {
    AppError::Conflict(format!(
        "Conversation {} was updated by another request, retry",
        session_id
    ))
}
