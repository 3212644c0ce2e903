//! Notes Module
//! Mission: Owner-scoped notes with sharing and full-text search

pub mod api;
pub mod models;
pub mod store;

pub use api::NotesState;
pub use models::{Note, NoteInput, ShareOutcome};
pub use store::NoteStore;
