//! User Storage
//! Mission: Store and look up user accounts in SQLite

use crate::auth::models::User;
use crate::storage::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{ffi, params, Connection, OptionalExtension};
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Username → account resolution used by `authenticate`
#[async_trait]
pub trait UserLookup: Send + Sync {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;
}

/// Insert failures
#[derive(Debug)]
pub enum InsertUserError {
    DuplicateUsername,
    Storage(anyhow::Error),
}

impl fmt::Display for InsertUserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertUserError::DuplicateUsername => write!(f, "Username already registered"),
            InsertUserError::Storage(e) => write!(f, "Failed to insert user: {:#}", e),
        }
    }
}

impl std::error::Error for InsertUserError {}

/// User storage with SQLite backend
pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get user by username
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.db.with_conn(|conn| load_user(conn, username))
    }

    /// Whether an account exists for `username`
    pub fn user_exists(&self, username: &str) -> Result<bool> {
        Ok(self.get_user_by_username(username)?.is_some())
    }

    /// Insert a new user with an already-hashed password.
    ///
    /// The UNIQUE constraint on `username` is the authority on duplicates, so
    /// two concurrent signups for the same name cannot both succeed.
    pub fn insert_user(&self, username: &str, password_hash: &str) -> Result<User, InsertUserError> {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };

        let inserted = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "INSERT INTO users (id, username, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    user.id.to_string(),
                    user.username,
                    user.password_hash,
                    user.created_at,
                ],
            ))
        });

        match inserted {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if is_unique_violation(&e) => return Err(InsertUserError::DuplicateUsername),
            Ok(Err(e)) => {
                return Err(InsertUserError::Storage(
                    anyhow::Error::new(e).context("Failed to insert user"),
                ))
            }
            Err(e) => return Err(InsertUserError::Storage(e)),
        }

        info!("✅ Created user: {}", user.username);

        Ok(user)
    }
}

#[async_trait]
impl UserLookup for UserStore {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.get_user_by_username(username)
    }
}

fn load_user(conn: &Connection, username: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, username, password_hash, created_at
         FROM users WHERE username = ?1",
    )?;

    let row = stmt
        .query_row(params![username], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .optional()?;

    row.map(|(id, username, password_hash, created_at)| {
        Ok(User {
            id: Uuid::parse_str(&id).with_context(|| format!("Corrupt user id {}", id))?,
            username,
            password_hash,
            created_at,
        })
    })
    .transpose()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::NamedTempFile;

    fn create_test_store() -> UserStore {
        UserStore::new(Database::in_memory().unwrap())
    }

    #[test]
    fn test_insert_and_retrieve_user() {
        let store = create_test_store();

        let alice = store.insert_user("alice", "hash-1").unwrap();
        assert_eq!(alice.username, "alice");

        let retrieved = store.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(retrieved.id, alice.id);
        assert_eq!(retrieved.password_hash, "hash-1");
        assert!(store.user_exists("alice").unwrap());
    }

    #[test]
    fn test_missing_user_is_none() {
        let store = create_test_store();
        assert!(store.get_user_by_username("nobody").unwrap().is_none());
        assert!(!store.user_exists("nobody").unwrap());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let store = create_test_store();

        store.insert_user("alice", "hash-1").unwrap();
        let err = store.insert_user("alice", "hash-2").unwrap_err();
        assert!(matches!(err, InsertUserError::DuplicateUsername));

        // The first registration wins
        let stored = store.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(stored.password_hash, "hash-1");
    }

    #[test]
    fn test_concurrent_signups_one_winner() {
        let store = Arc::new(create_test_store());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || store.insert_user("racer", &format!("hash-{i}")).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();

        UserStore::new(Database::open(db_path).unwrap())
            .insert_user("alice", "hash-1")
            .unwrap();

        let store = UserStore::new(Database::open(db_path).unwrap());
        assert!(store.user_exists("alice").unwrap());
    }

    #[tokio::test]
    async fn test_user_lookup_trait() {
        let store = create_test_store();
        store.insert_user("alice", "hash-1").unwrap();

        let lookup: &dyn UserLookup = &store;
        assert!(lookup.find_user_by_username("alice").await.unwrap().is_some());
        assert!(lookup.find_user_by_username("bob").await.unwrap().is_none());
    }
}
