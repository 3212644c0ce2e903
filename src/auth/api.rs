//! Authentication API Endpoints
//! Mission: Provide signup and login endpoints

use crate::api::error::ApiError;
use crate::auth::{
    jwt::JwtHandler,
    models::{LoginForm, LoginResponse, MessageResponse, SignupRequest},
    password::PasswordHasher,
    user_store::{InsertUserError, UserStore},
};
use anyhow::Context;
use axum::{extract::State, Form, Json};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub jwt_handler: Arc<JwtHandler>,
    pub password_hasher: PasswordHasher,
}

impl AuthState {
    pub fn new(
        user_store: Arc<UserStore>,
        jwt_handler: Arc<JwtHandler>,
        password_hasher: PasswordHasher,
    ) -> Self {
        Self {
            user_store,
            jwt_handler,
            password_hasher,
        }
    }
}

/// Signup endpoint - POST /api/auth/signup
pub async fn signup(
    State(state): State<AuthState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if payload.username.trim().is_empty() {
        return Err(ApiError::BadRequest("Username must not be empty".to_string()));
    }
    if payload.password.is_empty() {
        return Err(ApiError::BadRequest("Password must not be empty".to_string()));
    }

    // Fast path; the UNIQUE constraint still decides races
    if state.user_store.user_exists(&payload.username)? {
        warn!("❌ Signup for taken username: {}", payload.username);
        return Err(ApiError::DuplicateUsername);
    }

    let hasher = state.password_hasher;
    let password = payload.password;
    let password_hash = tokio::task::spawn_blocking(move || hasher.hash_password(&password))
        .await
        .context("Password hashing task failed")??;

    match state.user_store.insert_user(&payload.username, &password_hash) {
        Ok(user) => {
            info!("🔐 Signup: {}", user.username);
            Ok(Json(MessageResponse::new("User created successfully")))
        }
        Err(InsertUserError::DuplicateUsername) => {
            warn!("❌ Signup lost race for username: {}", payload.username);
            Err(ApiError::DuplicateUsername)
        }
        Err(InsertUserError::Storage(e)) => Err(ApiError::Internal(e)),
    }
}

/// Login endpoint - POST /api/auth/login (form-encoded)
pub async fn login(
    State(state): State<AuthState>,
    Form(form): Form<LoginForm>,
) -> Result<Json<LoginResponse>, ApiError> {
    info!("🔐 Login attempt: {}", form.username);

    let Some(user) = state.user_store.get_user_by_username(&form.username)? else {
        warn!("❌ Failed login attempt (unknown user): {}", form.username);
        return Err(ApiError::InvalidCredentials);
    };

    let hasher = state.password_hasher;
    let password = form.password;
    let stored_hash = user.password_hash.clone();
    let valid =
        tokio::task::spawn_blocking(move || hasher.verify_password(&password, &stored_hash))
            .await
            .context("Password verification task failed")?;

    if !valid {
        warn!("❌ Failed login attempt: {}", user.username);
        return Err(ApiError::InvalidCredentials);
    }

    let token = state.jwt_handler.issue_token(&user.username)?;

    info!("✅ Login successful: {}", user.username);

    Ok(Json(LoginResponse::bearer(token)))
}
