// src/tasks.rs

use actix_web::{web, HttpRequest, HttpResponse};
use log::info;
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::resolve_owner;
use crate::error::AppError;
use crate::models::{Task, TaskPatch, TaskStatus};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub client_id: Option<String>,
    pub title: Option<String>,
    pub estimated_minutes: Option<i64>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub estimated_minutes: Option<i64>,
    pub status: Option<TaskStatus>,
}

fn positive_minutes(value: i64) -> Result<u32, AppError> {
    u32::try_from(value)
        .ok()
        .filter(|m| *m > 0)
        .ok_or_else(|| AppError::Validation("estimatedMinutes must be a positive integer".into()))
}

impl UpdateTaskRequest {
    fn into_patch(self) -> Result<TaskPatch, AppError> {
        let title = match self.title {
            Some(t) if t.trim().is_empty() => {
                return Err(AppError::Validation("title must not be empty".into()))
            }
            other => other.map(|t| t.trim().to_string()),
        };
        let patch = TaskPatch {
            title,
            estimated_minutes: self.estimated_minutes.map(positive_minutes).transpose()?,
            status: self.status,
        };
        if patch.is_empty() {
            return Err(AppError::Validation("No fields to update".into()));
        }
        Ok(patch)
    }
}

/// GET /tasks?clientId=
pub async fn list_tasks(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<TaskQuery>,
) -> Result<HttpResponse, AppError> {
    let owner = resolve_owner(&req, query.client_id.as_deref())?;
    let tasks = data.storage.list_tasks(&owner).await?;
    Ok(HttpResponse::Ok().json(json!({ "tasks": tasks })))
}

/// POST /tasks
pub async fn create_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateTaskRequest>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    let owner = resolve_owner(&req, payload.client_id.as_deref())?;
    let title = payload
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Validation("Missing fields".into()))?;
    let minutes = payload
        .estimated_minutes
        .ok_or_else(|| AppError::Validation("Missing fields".into()))
        .and_then(positive_minutes)?;
    let session_id = payload.session_id.filter(|s| !s.trim().is_empty());

    let task = Task::new(&owner, title, minutes, session_id);
    data.storage.insert_tasks(std::slice::from_ref(&task)).await?;
    info!("Task created {} for {}", task.id, owner);

    Ok(HttpResponse::Ok().json(json!({ "task": task })))
}

/// PATCH /tasks/{id}
pub async fn update_task(
    data: web::Data<AppState>,
    task_id: web::Path<String>,
    payload: web::Json<UpdateTaskRequest>,
) -> Result<HttpResponse, AppError> {
    let patch = payload.into_inner().into_patch()?;
    match data.storage.update_task(&task_id, &patch).await? {
        Some(task) => {
            info!("Task {} updated", task.id);
            Ok(HttpResponse::Ok().json(json!({ "task": task })))
        }
        None => Err(AppError::NotFound("Task".into())),
    }
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::{json, Value};

    use crate::models::TaskStatus;
    use crate::storage::Storage;
    use crate::test_support::{test_app, test_state, ScriptedGenerator};

    #[actix_web::test]
    async fn create_then_list_returns_pending_task() {
        let (state, _) = test_state(ScriptedGenerator::new());
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/tasks")
            .set_json(json!({ "clientId": "c-1", "title": "Write essay", "estimatedMinutes": 45 }))
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(created["task"]["status"], "pending");
        assert_eq!(created["task"]["estimatedMinutes"], 45);

        let req = test::TestRequest::get().uri("/tasks?clientId=c-1").to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed["tasks"].as_array().unwrap().len(), 1);
        assert_eq!(listed["tasks"][0]["title"], "Write essay");
    }

    #[actix_web::test]
    async fn invalid_create_requests_are_rejected() {
        let (state, storage) = test_state(ScriptedGenerator::new());
        let app = test_app!(state);

        let bodies = [
            json!({ "clientId": "c-1", "title": "t", "estimatedMinutes": 0 }),
            json!({ "clientId": "c-1", "title": "t", "estimatedMinutes": -5 }),
            json!({ "clientId": "c-1", "estimatedMinutes": 10 }),
            json!({ "clientId": "c-1", "title": "   ", "estimatedMinutes": 10 }),
            json!({ "title": "t", "estimatedMinutes": 10 }),
            json!({ "clientId": "c-1", "title": "t" }),
        ];
        for body in bodies {
            let req = test::TestRequest::post().uri("/tasks").set_json(&body).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body: {}", body);
            let err: Value = test::read_body_json(resp).await;
            assert!(err["error"].is_string());
        }
        assert!(storage.list_tasks("c-1").await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn listing_requires_client_id() {
        let (state, _) = test_state(ScriptedGenerator::new());
        let app = test_app!(state);
        let resp = test::call_service(&app, test::TestRequest::get().uri("/tasks").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn listing_does_not_leak_other_clients() {
        let (state, _) = test_state(ScriptedGenerator::new());
        let app = test_app!(state);
        for (client, title) in [("c-1", "mine"), ("c-2", "theirs"), ("c-10", "also theirs")] {
            let req = test::TestRequest::post()
                .uri("/tasks")
                .set_json(json!({ "clientId": client, "title": title, "estimatedMinutes": 5 }))
                .to_request();
            test::call_service(&app, req).await;
        }

        let req = test::TestRequest::get().uri("/tasks?clientId=c-1").to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        let tasks = listed["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["clientId"], "c-1");
    }

    #[actix_web::test]
    async fn listing_matches_client_id_exactly() {
        let (state, _) = test_state(ScriptedGenerator::new());
        let app = test_app!(state);
        let req = test::TestRequest::post()
            .uri("/tasks")
            .set_json(json!({ "clientId": "c-1", "title": "secret", "estimatedMinutes": 5 }))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get().uri("/tasks?clientId=%20c-1%20").to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        assert!(listed["tasks"].as_array().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn patch_marks_task_completed() {
        let (state, storage) = test_state(ScriptedGenerator::new());
        let app = test_app!(state);
        let req = test::TestRequest::post()
            .uri("/tasks")
            .set_json(json!({ "clientId": "c-1", "title": "Run", "estimatedMinutes": 30 }))
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        let id = created["task"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::patch()
            .uri(&format!("/tasks/{}", id))
            .set_json(json!({ "status": "completed" }))
            .to_request();
        let updated: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(updated["task"]["status"], "completed");
        assert_eq!(
            storage.get_task(&id).await.unwrap().unwrap().status,
            TaskStatus::Completed
        );
    }

    #[actix_web::test]
    async fn patch_unknown_task_is_not_found() {
        let (state, storage) = test_state(ScriptedGenerator::new());
        let app = test_app!(state);
        let req = test::TestRequest::post()
            .uri("/tasks")
            .set_json(json!({ "clientId": "c-1", "title": "Run", "estimatedMinutes": 30 }))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::patch()
            .uri("/tasks/does-not-exist")
            .set_json(json!({ "status": "completed" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let tasks = storage.list_tasks("c-1").await.unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[actix_web::test]
    async fn patch_rejects_empty_and_unknown_status() {
        let (state, _) = test_state(ScriptedGenerator::new());
        let app = test_app!(state);
        for body in [json!({}), json!({ "status": "archived" }), json!({ "estimatedMinutes": 0 })] {
            let req = test::TestRequest::patch()
                .uri("/tasks/any")
                .set_json(&body)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body: {}", body);
        }
    }
}
