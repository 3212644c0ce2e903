use axum::{
    middleware,
    response::Json,
    routing::{delete, get, post, put, MethodRouter},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::auth::{api as auth_api, auth_middleware, AuthState};
use crate::clock::Clock;
use crate::middleware::{admit, request_logging, AdmissionGate, Operation, RateLimiters};
use crate::notes::{api as notes_api, NotesState};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub notes: NotesState,
    pub limiters: RateLimiters,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    fn gate(&self, operation: Operation) -> AdmissionGate {
        AdmissionGate::new(operation, &self.limiters, self.clock.clone())
    }

    /// Bind a route to its own limiter
    fn limited(
        &self,
        operation: Operation,
        route: MethodRouter<NotesState>,
    ) -> MethodRouter<NotesState> {
        route.route_layer(middleware::from_fn_with_state(self.gate(operation), admit))
    }
}

/// Create the API router
///
/// Protected requests are authenticated first, then admitted by the
/// limiter for their operation class.
pub fn create_router(state: AppState) -> Router {
    let auth_router = Router::new()
        .route("/api/auth/signup", post(auth_api::signup))
        .route("/api/auth/login", post(auth_api::login))
        .with_state(state.auth.clone());

    let protected_routes = Router::new()
        .route(
            "/api/notes",
            state
                .limited(Operation::ListNotes, get(notes_api::list_notes))
                .merge(state.limited(Operation::CreateNote, post(notes_api::create_note))),
        )
        .route(
            "/api/notes/:id",
            state
                .limited(Operation::GetNote, get(notes_api::get_note))
                .merge(state.limited(Operation::UpdateNote, put(notes_api::update_note)))
                .merge(state.limited(Operation::DeleteNote, delete(notes_api::delete_note))),
        )
        .route("/api/notes/:id/share", post(notes_api::share_note))
        .route("/api/search", get(notes_api::search_notes))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ))
        .with_state(state.notes.clone());

    let public_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(auth_router)
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}
