//! API error mapping: every failure leaves as `{"detail": <message>}`

use crate::auth::AuthError;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    DuplicateUsername,
    InvalidCredentials,
    Auth(AuthError),
    RateLimited { retry_after_secs: Option<u64> },
    NoteNotFound,
    ShareTargetNotFound,
    AlreadyShared,
    BadRequest(String),
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::DuplicateUsername
            | ApiError::InvalidCredentials
            | ApiError::AlreadyShared
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(e) => e.status(),
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NoteNotFound | ApiError::ShareTargetNotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn detail(&self) -> String {
        match self {
            ApiError::DuplicateUsername => "Username already registered".to_string(),
            ApiError::InvalidCredentials => "Invalid username or password".to_string(),
            ApiError::Auth(e) => e.message().to_string(),
            ApiError::RateLimited { .. } => "Too Many Requests".to_string(),
            ApiError::NoteNotFound => "Note not found".to_string(),
            ApiError::ShareTargetNotFound => "User not found".to_string(),
            ApiError::AlreadyShared => "Note already shared with this user".to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Internal(e) => write!(f, "Internal server error: {:#}", e),
            other => f.write_str(&other.detail()),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(e) => e.into_response(),
            ApiError::RateLimited {
                retry_after_secs: Some(secs),
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, secs.to_string())],
                Json(json!({ "detail": "Too Many Requests" })),
            )
                .into_response(),
            other => {
                if let ApiError::Internal(err) = &other {
                    tracing::error!("Internal error: {:#}", err);
                }
                (other.status(), Json(json!({ "detail": other.detail() }))).into_response()
            }
        }
    }
}
