use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{stale_state, Storage};
use crate::error::AppError;
use crate::models::{ChatMessage, ChatSession, ConversationState, FlowMode, Task, TaskPatch};

#[derive(Default)]
struct Inner {
    tasks: Vec<Task>,
    sessions: HashMap<String, ChatSession>,
    messages: Vec<ChatMessage>,
    states: HashMap<String, ConversationState>,
}

/// Process-local store. Everything sits behind one mutex that is never held
/// across an await point, so each trait call is atomic.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn list_tasks(&self, client_id: &str) -> Result<Vec<Task>, AppError> {
        let inner = self.lock()?;
        let mut tasks: Vec<Task> = inner
            .tasks
            .iter()
            .filter(|t| t.client_id == client_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, AppError> {
        Ok(self.lock()?.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<(), AppError> {
        self.lock()?.tasks.extend_from_slice(tasks);
        Ok(())
    }

    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>, AppError> {
        let mut inner = self.lock()?;
        Ok(inner.tasks.iter_mut().find(|t| t.id == id).map(|task| {
            task.apply(patch);
            task.clone()
        }))
    }

    async fn resolve_session(&self, id: &str, owner_id: &str) -> Result<ChatSession, AppError> {
        let mut inner = self.lock()?;
        Ok(inner
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| ChatSession::new(id, owner_id))
            .clone())
    }

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, AppError> {
        Ok(self.lock()?.sessions.get(id).cloned())
    }

    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<ChatSession>, AppError> {
        let inner = self.lock()?;
        let mut sessions: Vec<ChatSession> = inner
            .sessions
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn finish_session(&self, id: &str) -> Result<(), AppError> {
        if let Some(session) = self.lock()?.sessions.get_mut(id) {
            session.is_finished = true;
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn rename_session(
        &self,
        id: &str,
        title: Option<&str>,
    ) -> Result<Option<ChatSession>, AppError> {
        let mut inner = self.lock()?;
        Ok(inner.sessions.get_mut(id).map(|session| {
            session.title = title.map(str::to_string);
            session.updated_at = Utc::now();
            session.clone()
        }))
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        if let Some(session) = inner.sessions.get_mut(&message.session_id) {
            session.updated_at = message.created_at;
        }
        inner.messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        let inner = self.lock()?;
        let mut messages: Vec<ChatMessage> = inner
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        // stable: equal timestamps keep insertion order
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn load_or_create_state(
        &self,
        session_id: &str,
        mode: FlowMode,
    ) -> Result<ConversationState, AppError> {
        let mut inner = self.lock()?;
        Ok(inner
            .states
            .entry(session_id.to_string())
            .or_insert_with(|| ConversationState::new(session_id, mode))
            .clone())
    }

    async fn save_state(&self, state: &mut ConversationState) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        match inner.states.get(&state.session_id) {
            Some(stored) if stored.version == state.version => {
                state.version += 1;
                state.updated_at = Utc::now();
                inner.states.insert(state.session_id.clone(), state.clone());
                Ok(())
            }
            _ => Err(stale_state(&state.session_id)),
        }
    }

    async fn delete_state(&self, session_id: &str, version: u64) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        match inner.states.get(session_id) {
            Some(stored) if stored.version == version => {
                inner.states.remove(session_id);
                Ok(())
            }
            _ => Err(stale_state(session_id)),
        }
    }
}
