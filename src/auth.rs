//! Bearer-token consumption. Tokens are issued by the external auth
//! provider; this service only verifies them and reads the subject.

use actix_web::{HttpMessage, HttpRequest};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Authenticated user id, attached to the request by the middleware.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

pub fn verify_token(token: &str, secret: &str) -> Result<String, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map(|data| data.claims.sub)
    .map_err(|e| AppError::Unauthorized(e.to_string()))
}

/// Whose data a request touches: the token subject when present, otherwise
/// the caller-supplied client id, taken verbatim.
pub fn resolve_owner(req: &HttpRequest, client_id: Option<&str>) -> Result<String, AppError> {
    if let Some(user) = req.extensions().get::<AuthenticatedUser>() {
        return Ok(user.0.clone());
    }
    match client_id {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(AppError::Validation("Missing clientId".to_string())),
    }
}

/// Like [`resolve_owner`] but anonymous callers without a client id are
/// allowed.
pub fn optional_owner(req: &HttpRequest, client_id: Option<&str>) -> Option<String> {
    resolve_owner(req, client_id).ok()
}
