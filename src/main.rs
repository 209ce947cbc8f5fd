// src/main.rs

mod app_state;
mod auth;
mod chat;
mod config;
mod duration;
mod error;
mod extraction;
mod focus;
mod llm;
mod models;
mod questionnaire;
mod routes;
mod storage;
mod tasks;
#[cfg(test)]
mod test_support;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_cors::Cors;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http,
    middleware::Logger,
    web, App, Error, HttpMessage, HttpServer, ResponseError,
};
use env_logger::Env;
use futures::future::{ok, Ready};
use log::info;

use crate::app_state::AppState;
use crate::auth::{verify_token, AuthenticatedUser};
use crate::config::{Config, StorageBackend};
use crate::error::AppError;
use crate::llm::ChatCompletionsClient;
use crate::storage::{MemoryStorage, MongoStorage, Storage};

/// Verifies `Authorization: Bearer <jwt>` when a secret is configured and
/// attaches the subject as [`AuthenticatedUser`]. Requests without a token
/// pass through as anonymous.
#[derive(Debug, Clone)]
pub struct Authentication {
    secret: Option<Arc<str>>,
}

impl Authentication {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret.map(Arc::from),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: Option<Arc<str>>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let bearer = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string());

        if let (Some(secret), Some(token)) = (&self.secret, bearer) {
            match verify_token(&token, secret) {
                Ok(user_id) => {
                    req.extensions_mut().insert(AuthenticatedUser(user_id));
                }
                Err(e) => {
                    let (req_parts, _payload) = req.into_parts();
                    let resp = e.error_response();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

async fn build_state(config: &Config) -> Result<AppState, AppError> {
    let storage: Arc<dyn Storage> = match config.storage_backend {
        StorageBackend::Mongo => {
            let uri = config
                .mongo_uri
                .as_deref()
                .ok_or_else(|| AppError::Config("MONGO_URI must be set".to_string()))?;
            Arc::new(MongoStorage::init(uri, &config.database_name).await?)
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage; state is lost on restart");
            Arc::new(MemoryStorage::new())
        }
    };
    let generator = Arc::new(ChatCompletionsClient::new(config)?);
    Ok(AppState { storage, generator })
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    let bind_addr = config.bind_addr.clone();
    let frontend_origin = config.frontend_origin.clone();
    let auth = Authentication::new(config.jwt_secret.as_deref());
    let state = build_state(&config)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    info!("Server running at http://{}", bind_addr);
    info!("Allowed CORS Origin: {}", frontend_origin);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PATCH", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(auth.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(bind_addr)?
    .run()
    .await
}
