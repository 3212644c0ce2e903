//! Note Storage
//! Mission: Owner-scoped note CRUD, sharing and full-text search over SQLite
//!
//! Every write touches `notes` and `notes_fts` in one transaction, keyed by
//! `notes.seq`, so search never sees a half-applied change.

use crate::notes::models::{Note, NoteInput, ShareOutcome};
use crate::storage::Database;
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, types::Type, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

const NOTE_COLUMNS: &str =
    "n.id, n.owner_id, n.title, n.content, n.shared_with_json, n.created_at, n.updated_at";

/// Upper bound on search results
pub const MAX_SEARCH_RESULTS: usize = 100;

pub struct NoteStore {
    db: Database,
}

impl NoteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(&self, owner_id: Uuid, input: &NoteInput) -> Result<Note> {
        let now = timestamp();
        let note = Note {
            id: Uuid::new_v4(),
            owner_id,
            title: input.title.clone(),
            content: input.content.clone(),
            shared_with: input.shared_with.clone().unwrap_or_default(),
            created_at: now.clone(),
            updated_at: now,
        };
        let shared_with_json = serde_json::to_string(&note.shared_with)?;

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO notes (id, owner_id, title, content, shared_with_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    note.id.to_string(),
                    note.owner_id.to_string(),
                    note.title,
                    note.content,
                    shared_with_json,
                    note.created_at,
                    note.updated_at,
                ],
            )
            .context("Failed to insert note")?;
            let seq = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO notes_fts (rowid, title, content) VALUES (?1, ?2, ?3)",
                params![seq, note.title, note.content],
            )
            .context("Failed to index note")?;
            tx.commit()?;
            Ok(())
        })?;

        debug!(note_id = %note.id, owner_id = %owner_id, "Note created");
        Ok(note)
    }

    /// Notes owned by `owner_id`, oldest first
    pub fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Note>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {NOTE_COLUMNS} FROM notes n WHERE n.owner_id = ?1 ORDER BY n.seq"
            ))?;
            let notes = stmt
                .query_map(params![owner_id.to_string()], note_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(notes)
        })
    }

    pub fn get_for_owner(&self, note_id: Uuid, owner_id: Uuid) -> Result<Option<Note>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {NOTE_COLUMNS} FROM notes n WHERE n.id = ?1 AND n.owner_id = ?2"
            ))?;
            let note = stmt
                .query_row(
                    params![note_id.to_string(), owner_id.to_string()],
                    note_from_row,
                )
                .optional()?;
            Ok(note)
        })
    }

    /// Returns false when no note with that id belongs to `owner_id`
    pub fn update_for_owner(&self, note_id: Uuid, owner_id: Uuid, input: &NoteInput) -> Result<bool> {
        let shared_with_json = input
            .shared_with
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = timestamp();

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let Some(seq) = owned_seq(&tx, note_id, owner_id)? else {
                return Ok(false);
            };

            tx.execute(
                "UPDATE notes
                 SET title = ?1, content = ?2,
                     shared_with_json = COALESCE(?3, shared_with_json),
                     updated_at = ?4
                 WHERE seq = ?5",
                params![input.title, input.content, shared_with_json, now, seq],
            )?;
            tx.execute(
                "UPDATE notes_fts SET title = ?1, content = ?2 WHERE rowid = ?3",
                params![input.title, input.content, seq],
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn delete_for_owner(&self, note_id: Uuid, owner_id: Uuid) -> Result<bool> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let Some(seq) = owned_seq(&tx, note_id, owner_id)? else {
                return Ok(false);
            };

            tx.execute("DELETE FROM notes_fts WHERE rowid = ?1", params![seq])?;
            tx.execute("DELETE FROM notes WHERE seq = ?1", params![seq])?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Add `username` to the note's share list. The caller checks that the
    /// user exists.
    pub fn share(&self, note_id: Uuid, owner_id: Uuid, username: &str) -> Result<ShareOutcome> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let row: Option<(i64, String)> = tx
                .query_row(
                    "SELECT seq, shared_with_json FROM notes WHERE id = ?1 AND owner_id = ?2",
                    params![note_id.to_string(), owner_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((seq, shared_with_json)) = row else {
                return Ok(ShareOutcome::NoteNotFound);
            };

            let mut shared_with: Vec<String> = serde_json::from_str(&shared_with_json)
                .with_context(|| format!("Corrupt share list on note {}", note_id))?;
            if shared_with.iter().any(|u| u == username) {
                return Ok(ShareOutcome::AlreadyShared);
            }
            shared_with.push(username.to_string());

            tx.execute(
                "UPDATE notes SET shared_with_json = ?1 WHERE seq = ?2",
                params![serde_json::to_string(&shared_with)?, seq],
            )?;
            tx.commit()?;
            Ok(ShareOutcome::Shared)
        })
    }

    /// Full-text search over the owner's note titles and contents. Terms are
    /// OR-ed; best matches first.
    pub fn search(&self, owner_id: Uuid, raw_query: &str) -> Result<Vec<Note>> {
        let fts_query = build_fts_query(raw_query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {NOTE_COLUMNS}
                 FROM notes_fts
                 JOIN notes n ON n.seq = notes_fts.rowid
                 WHERE notes_fts MATCH ?1 AND n.owner_id = ?2
                 ORDER BY notes_fts.rank
                 LIMIT ?3"
            ))?;
            let notes = stmt
                .query_map(
                    params![fts_query, owner_id.to_string(), MAX_SEARCH_RESULTS as i64],
                    note_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("FTS search failed")?;
            Ok(notes)
        })
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn owned_seq(conn: &rusqlite::Connection, note_id: Uuid, owner_id: Uuid) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT seq FROM notes WHERE id = ?1 AND owner_id = ?2",
            params![note_id.to_string(), owner_id.to_string()],
            |row| row.get(0),
        )
        .optional()?)
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    let shared_with_json: String = row.get(4)?;
    Ok(Note {
        id: uuid_column(row, 0)?,
        owner_id: uuid_column(row, 1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        shared_with: serde_json::from_str(&shared_with_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Turn free text into a safe FTS5 query: every whitespace-separated term is
/// quoted (so operators and punctuation are literal) and the terms are OR-ed.
pub fn build_fts_query(raw: &str) -> String {
    raw.split_whitespace()
        .map(|t| t.replace('"', ""))
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}
