// src/routes.rs

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::chat::{create_message, get_chat, rename_session, send_chat};
use crate::error::AppError;
use crate::focus::focus_timer;
use crate::questionnaire::next_step;
use crate::tasks::{create_task, list_tasks, update_task};

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Mounts every endpoint. Extractor failures are rendered with the same
/// `{ "error": ... }` body as handler errors.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        AppError::Validation(format!("Invalid JSON body: {}", err)).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        AppError::Validation(format!("Invalid query string: {}", err)).into()
    }))
    .route("/health", web::get().to(health))
    .service(
        web::scope("/tasks")
            .route("", web::get().to(list_tasks))
            .route("", web::post().to(create_task))
            .route("/{id}", web::patch().to(update_task)),
    )
    .service(
        web::scope("/chat")
            .route("", web::get().to(get_chat))
            .route("", web::post().to(send_chat))
            .route("/messages", web::post().to(create_message))
            .route("/{id}", web::patch().to(rename_session)),
    )
    .route("/next", web::post().to(next_step))
    .route("/focus", web::get().to(focus_timer));
}
