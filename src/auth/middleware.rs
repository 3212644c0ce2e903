//! Authentication Middleware
//! Mission: Protect API endpoints with bearer token validation

use crate::auth::{api::AuthState, jwt::JwtHandler, models::User, user_store::UserLookup};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use tracing::{error, warn};

/// Authenticated caller, inserted into request extensions by `auth_middleware`
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Pull the token out of `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolve a bearer token to an existing account.
///
/// Fails with `InvalidToken` when the signature or expiry check fails and
/// with `UserNotFound` when the subject no longer has an account.
pub async fn authenticate(
    jwt_handler: &JwtHandler,
    users: &dyn UserLookup,
    token: &str,
) -> Result<User, AuthError> {
    let claims = jwt_handler.verify_token(token)?;

    users
        .find_user_by_username(&claims.sub)
        .await
        .map_err(|e| {
            error!("User lookup failed during authentication: {:#}", e);
            AuthError::Internal
        })?
        .ok_or(AuthError::UserNotFound)
}

/// Auth middleware that validates bearer tokens
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = bearer_token(req.headers())
        .ok_or(AuthError::MissingToken)?
        .to_string();

    let user = authenticate(&state.jwt_handler, state.user_store.as_ref(), &token)
        .await
        .map_err(|e| {
            warn!(path = %req.uri().path(), "Rejected request: {}", e);
            e
        })?;

    // Handlers read the caller through `Extension<CurrentUser>`
    req.extensions_mut().insert(CurrentUser(user));

    Ok(next.run(req).await)
}

/// Auth error types
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    UserNotFound,
    Internal,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "Not authenticated",
            AuthError::InvalidToken => "Invalid token",
            AuthError::UserNotFound => "User not found",
            AuthError::Internal => "Internal server error",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "detail": self.message() }));

        match self {
            AuthError::MissingToken => (
                self.status(),
                [(header::WWW_AUTHENTICATE, "Bearer")],
                body,
            )
                .into_response(),
            _ => (self.status(), body).into_response(),
        }
    }
}
