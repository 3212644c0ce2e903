//! Notes API Endpoints
//! Mission: Per-user note CRUD, sharing and search for authenticated callers

use crate::api::error::ApiError;
use crate::auth::{models::MessageResponse, CurrentUser, UserStore};
use crate::notes::{
    models::{Note, NoteCreatedResponse, NoteInput, SearchQuery, ShareOutcome, ShareQuery},
    store::NoteStore,
};
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Shared notes state
#[derive(Clone)]
pub struct NotesState {
    pub note_store: Arc<NoteStore>,
    pub user_store: Arc<UserStore>,
}

/// Unparseable ids cannot name an existing note
fn parse_note_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NoteNotFound)
}

/// POST /api/notes
pub async fn create_note(
    State(state): State<NotesState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(input): Json<NoteInput>,
) -> Result<Json<NoteCreatedResponse>, ApiError> {
    let note = state.note_store.create(user.id, &input)?;

    info!(note_id = %note.id, user = %user.username, "📝 Note created");

    Ok(Json(NoteCreatedResponse {
        message: "Note created successfully".to_string(),
        id: note.id,
    }))
}

/// GET /api/notes
pub async fn list_notes(
    State(state): State<NotesState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Vec<Note>>, ApiError> {
    Ok(Json(state.note_store.list_for_owner(user.id)?))
}

/// GET /api/notes/:id
pub async fn get_note(
    State(state): State<NotesState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<Note>, ApiError> {
    let note_id = parse_note_id(&id)?;

    state
        .note_store
        .get_for_owner(note_id, user.id)?
        .map(Json)
        .ok_or(ApiError::NoteNotFound)
}

/// PUT /api/notes/:id
pub async fn update_note(
    State(state): State<NotesState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(input): Json<NoteInput>,
) -> Result<Json<MessageResponse>, ApiError> {
    let note_id = parse_note_id(&id)?;

    if !state.note_store.update_for_owner(note_id, user.id, &input)? {
        return Err(ApiError::NoteNotFound);
    }

    Ok(Json(MessageResponse::new("Note updated successfully")))
}

/// DELETE /api/notes/:id
pub async fn delete_note(
    State(state): State<NotesState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let note_id = parse_note_id(&id)?;

    if !state.note_store.delete_for_owner(note_id, user.id)? {
        return Err(ApiError::NoteNotFound);
    }

    info!(note_id = %note_id, user = %user.username, "🗑️  Note deleted");

    Ok(Json(MessageResponse::new("Note deleted successfully")))
}

/// POST /api/notes/:id/share?username=<name>
pub async fn share_note(
    State(state): State<NotesState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(query): Query<ShareQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    // Unknown target user is reported before an unknown note
    if !state.user_store.user_exists(&query.username)? {
        return Err(ApiError::ShareTargetNotFound);
    }

    let note_id = parse_note_id(&id)?;

    match state.note_store.share(note_id, user.id, &query.username)? {
        ShareOutcome::Shared => {
            info!(note_id = %note_id, with = %query.username, "🤝 Note shared");
            Ok(Json(MessageResponse::new("Note shared successfully")))
        }
        ShareOutcome::NoteNotFound => Err(ApiError::NoteNotFound),
        ShareOutcome::AlreadyShared => Err(ApiError::AlreadyShared),
    }
}

/// GET /api/search?q=<text>
pub async fn search_notes(
    State(state): State<NotesState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Note>>, ApiError> {
    Ok(Json(state.note_store.search(user.id, &query.q)?))
}
