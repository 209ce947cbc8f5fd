use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use log::info;
use mongodb::bson::{doc, to_bson, to_document, Document};
use mongodb::options::{ClientOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::de::DeserializeOwned;

use super::{stale_state, Storage};
use crate::error::AppError;
use crate::models::{ChatMessage, ChatSession, ConversationState, FlowMode, Task, TaskPatch};

const TASKS: &str = "tasks";
const SESSIONS: &str = "chat_sessions";
const MESSAGES: &str = "messages";
const STATES: &str = "conversation_states";

pub struct MongoStorage {
    db: Database,
}

impl MongoStorage {
    pub async fn init(uri: &str, db_name: &str) -> Result<Self, AppError> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        let storage = MongoStorage { db };
        storage.ensure_indexes().await?;
        info!("Connected to MongoDB database {}", db_name);
        Ok(storage)
    }

    /// Unique keys make the create-if-absent upserts safe under concurrency.
    async fn ensure_indexes(&self) -> Result<(), AppError> {
        let unique = |keys: Document| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };
        self.tasks().create_index(unique(doc! { "id": 1 })).await?;
        self.tasks()
            .create_index(IndexModel::builder().keys(doc! { "clientId": 1 }).build())
            .await?;
        self.sessions().create_index(unique(doc! { "id": 1 })).await?;
        self.messages()
            .create_index(IndexModel::builder().keys(doc! { "sessionId": 1 }).build())
            .await?;
        self.states().create_index(unique(doc! { "sessionId": 1 })).await?;
        Ok(())
    }

    fn tasks(&self) -> Collection<Task> {
        self.db.collection(TASKS)
    }

    fn sessions(&self) -> Collection<ChatSession> {
        self.db.collection(SESSIONS)
    }

    fn messages(&self) -> Collection<ChatMessage> {
        self.db.collection(MESSAGES)
    }

    fn states(&self) -> Collection<ConversationState> {
        self.db.collection(STATES)
    }
}

async fn collect<T>(coll: &Collection<T>, filter: Document) -> Result<Vec<T>, AppError>
where
    T: DeserializeOwned + Send + Sync,
{
    let mut cursor = coll.find(filter).await?;
    let mut items = Vec::new();
    while let Some(item) = cursor.next().await {
        items.push(item?);
    }
    Ok(items)
}

/// `$setOnInsert` payload: the full document minus the key it is looked up by.
fn insert_defaults<T: serde::Serialize>(value: &T, key: &str) -> Result<Document, AppError> {
    let mut document = to_document(value)?;
    document.remove(key);
    Ok(document)
}

/// Matches a conversation state only while it still carries `version`.
fn versioned(session_id: &str, version: u64) -> Document {
    doc! { "sessionId": session_id, "version": version as i64 }
}

#[async_trait]
impl Storage for MongoStorage {
    async fn list_tasks(&self, client_id: &str) -> Result<Vec<Task>, AppError> {
        let mut tasks = collect(&self.tasks(), doc! { "clientId": client_id }).await?;
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, AppError> {
        Ok(self.tasks().find_one(doc! { "id": id }).await?)
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<(), AppError> {
        if tasks.is_empty() {
            return Ok(());
        }
        self.tasks().insert_many(tasks).await?;
        Ok(())
    }

    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>, AppError> {
        let mut set_doc = doc! { "updatedAt": to_bson(&Utc::now())? };
        if let Some(title) = &patch.title {
            set_doc.insert("title", title);
        }
        if let Some(minutes) = patch.estimated_minutes {
            set_doc.insert("estimatedMinutes", i64::from(minutes));
        }
        if let Some(status) = patch.status {
            set_doc.insert("status", status.as_str());
        }
        Ok(self
            .tasks()
            .find_one_and_update(doc! { "id": id }, doc! { "$set": set_doc })
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn resolve_session(&self, id: &str, owner_id: &str) -> Result<ChatSession, AppError> {
        let defaults = insert_defaults(&ChatSession::new(id, owner_id), "id")?;
        self.sessions()
            .find_one_and_update(doc! { "id": id }, doc! { "$setOnInsert": defaults })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| AppError::Storage(format!("upsert of session {} returned nothing", id)))
    }

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, AppError> {
        Ok(self.sessions().find_one(doc! { "id": id }).await?)
    }

    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<ChatSession>, AppError> {
        let mut sessions = collect(&self.sessions(), doc! { "ownerId": owner_id }).await?;
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn finish_session(&self, id: &str) -> Result<(), AppError> {
        self.sessions()
            .update_one(
                doc! { "id": id },
                doc! { "$set": { "isFinished": true, "updatedAt": to_bson(&Utc::now())? } },
            )
            .await?;
        Ok(())
    }

    async fn rename_session(
        &self,
        id: &str,
        title: Option<&str>,
    ) -> Result<Option<ChatSession>, AppError> {
        let update = doc! { "$set": { "title": title, "updatedAt": to_bson(&Utc::now())? } };
        Ok(self
            .sessions()
            .find_one_and_update(doc! { "id": id }, update)
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), AppError> {
        self.messages().insert_one(message).await?;
        self.sessions()
            .update_one(
                doc! { "id": &message.session_id },
                doc! { "$set": { "updatedAt": to_bson(&message.created_at)? } },
            )
            .await?;
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        let mut messages = collect(&self.messages(), doc! { "sessionId": session_id }).await?;
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn load_or_create_state(
        &self,
        session_id: &str,
        mode: FlowMode,
    ) -> Result<ConversationState, AppError> {
        let defaults = insert_defaults(&ConversationState::new(session_id, mode), "sessionId")?;
        self.states()
            .find_one_and_update(
                doc! { "sessionId": session_id },
                doc! { "$setOnInsert": defaults },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| {
                AppError::Storage(format!("upsert of conversation {} returned nothing", session_id))
            })
    }

    async fn save_state(&self, state: &mut ConversationState) -> Result<(), AppError> {
        let expected = state.version;
        let mut next = state.clone();
        next.version = expected + 1;
        next.updated_at = Utc::now();

        let result = self
            .states()
            .replace_one(versioned(&state.session_id, expected), &next)
            .await?;
        if result.matched_count == 0 {
            return Err(stale_state(&state.session_id));
        }
        *state = next;
        Ok(())
    }

    async fn delete_state(&self, session_id: &str, version: u64) -> Result<(), AppError> {
        let result = self
            .states()
            .delete_one(versioned(session_id, version))
            .await?;
        if result.deleted_count == 0 {
            return Err(stale_state(session_id));
        }
        Ok(())
    }
}
