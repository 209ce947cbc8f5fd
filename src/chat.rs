// File: chat.rs

use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::resolve_owner;
use crate::error::AppError;
use crate::extraction::{extract_tasks, render_summary};
use crate::llm::Prompt;
use crate::models::{ChatMessage, ChatSession, MessageRole, Task};
use crate::storage::Storage;

const EXTRACTION_PROMPT: &str = r#"You are a motivating, empathetic task assistant.
Extract each goal or task the user mentions, with an estimated time for completion.
If the user appears sad, say something uplifting and suggest a walk or nap.
Output the extraction first, then a short table with breaks included, then advice.
Always end responses with encouragement.
Format the extraction as a JSON list inside a ```json code block:
[{"task":"<task>","estimatedTime":"<time>"}]"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: Option<String>,
    pub client_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    /// Model output, untouched.
    pub response: String,
    pub tasks: Vec<Task>,
    pub session_id: String,
    pub summary: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQuery {
    pub client_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub client_id: Option<String>,
    pub session_id: Option<String>,
    pub role: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameSessionRequest {
    pub client_id: Option<String>,
    pub title: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolves (creating if needed) the session `id` for `owner`. A session
/// that belongs to someone else is reported as missing.
pub(crate) async fn open_session(
    storage: &dyn Storage,
    id: &str,
    owner: &str,
) -> Result<ChatSession, AppError> {
    let session = storage.resolve_session(id, owner).await?;
    if session.owner_id != owner {
        return Err(AppError::NotFound("Chat session".into()));
    }
    Ok(session)
}

/// POST /chat
pub async fn send_chat(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<ChatRequest>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    let message = non_empty(payload.message.as_deref())
        .ok_or_else(|| AppError::Validation("Message content is required.".into()))?
        .to_string();
    let owner = resolve_owner(&req, payload.client_id.as_deref())?;
    let session_id = non_empty(payload.session_id.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let session = open_session(data.storage.as_ref(), &session_id, &owner).await?;
    let user_message = ChatMessage::new(&session.id, MessageRole::User, &message);

    let prompt = Prompt::new(EXTRACTION_PROMPT, message.as_str(), 512).with_temperature(0.7);
    let reply = data.generator.generate(&prompt).await?;
    data.storage.append_message(&user_message).await?;

    let extracted = extract_tasks(&reply);
    debug!("Extracted {} tasks for session {}", extracted.len(), session.id);
    let tasks: Vec<Task> = extracted
        .iter()
        .map(|t| Task::new(&owner, &t.title, t.estimated_minutes, Some(session.id.clone())))
        .collect();
    data.storage.insert_tasks(&tasks).await?;
    data.storage
        .append_message(&ChatMessage::new(&session.id, MessageRole::Assistant, &reply))
        .await?;
    info!("Chat turn in session {} produced {} tasks", session.id, tasks.len());

    Ok(HttpResponse::Ok().json(ChatResponse {
        summary: render_summary(&extracted, &message),
        response: reply,
        tasks,
        session_id: session.id,
    }))
}

/// GET /chat?clientId=&sessionId=
pub async fn get_chat(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<ChatQuery>,
) -> Result<HttpResponse, AppError> {
    let owner = resolve_owner(&req, query.client_id.as_deref())?;

    match non_empty(query.session_id.as_deref()) {
        Some(session_id) => {
            let session = owned_session(data.storage.as_ref(), session_id, &owner).await?;
            let messages = data.storage.list_messages(&session.id).await?;
            Ok(HttpResponse::Ok().json(json!({ "session": session, "messages": messages })))
        }
        None => {
            let sessions = data.storage.list_sessions(&owner).await?;
            Ok(HttpResponse::Ok().json(json!({ "sessions": sessions })))
        }
    }
}

/// Existing session `id` if `owner` holds it.
async fn owned_session(
    storage: &dyn Storage,
    id: &str,
    owner: &str,
) -> Result<ChatSession, AppError> {
    storage
        .get_session(id)
        .await?
        .filter(|s| s.owner_id == owner)
        .ok_or_else(|| AppError::NotFound("Chat session".into()))
}

/// POST /chat/messages
pub async fn create_message(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let owner = resolve_owner(&req, payload.client_id.as_deref())?;
    let missing = || AppError::Validation("Missing fields".into());
    let session_id = non_empty(payload.session_id.as_deref()).ok_or_else(missing)?;
    let content = non_empty(payload.content.as_deref()).ok_or_else(missing)?;
    let role = match non_empty(payload.role.as_deref()).ok_or_else(missing)? {
        "user" => MessageRole::User,
        "assistant" => MessageRole::Assistant,
        other => return Err(AppError::Validation(format!("Unknown role '{}'", other))),
    };

    let session = owned_session(data.storage.as_ref(), session_id, &owner).await?;
    let message = ChatMessage::new(&session.id, role, content);
    data.storage.append_message(&message).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": message })))
}

/// PATCH /chat/{id}: names a conversation. An empty title clears it.
pub async fn rename_session(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<RenameSessionRequest>,
) -> Result<HttpResponse, AppError> {
    let owner = resolve_owner(&req, payload.client_id.as_deref())?;
    let title = payload
        .title
        .as_deref()
        .ok_or_else(|| AppError::Validation("Missing title".into()))?;
    let session = owned_session(data.storage.as_ref(), &path, &owner).await?;

    let session = data
        .storage
        .rename_session(&session.id, non_empty(Some(title)))
        .await?
        .ok_or_else(|| AppError::NotFound("Chat session".into()))?;
    info!("Chat session {} renamed", session.id);
    Ok(HttpResponse::Ok().json(json!({ "session": session })))
}
