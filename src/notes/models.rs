//! Note data structures

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored note
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: Uuid,
    #[serde(skip_serializing, default = "Uuid::nil")]
    pub owner_id: Uuid,
    pub title: String,
    pub content: String,
    pub shared_with: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Create/update body
#[derive(Debug, Clone, Deserialize)]
pub struct NoteInput {
    pub title: String,
    pub content: String,
    /// On update, the list is replaced only when present
    #[serde(default)]
    pub shared_with: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ShareQuery {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NoteCreatedResponse {
    pub message: String,
    pub id: Uuid,
}

/// Outcome of sharing a note with another user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    Shared,
    NoteNotFound,
    AlreadyShared,
}
