//! SQLite store for saved values and cached conversation threads.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::assistant::tools::MAX_VALUE_NAME_CHARS;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// A value about to be saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewValue {
    pub user_id: i64,
    pub name: String,
    pub description: String,
}

/// A saved value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRecord {
    pub id: i64,
    pub user_id: i64,
    pub value_name: String,
    pub description: String,
    pub created_at: String,
}

/// Where accepted values are committed.
#[async_trait]
pub trait ValueSink: Send + Sync {
    /// Commit one value. Returns the new record id.
    async fn insert(&self, value: NewValue) -> Result<i64, StoreError>;
}

/// Persistent SQLite database.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        info!("Opened database at {:?}", path);
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(r#"
            CREATE TABLE IF NOT EXISTS uservalues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                value_name TEXT NOT NULL CHECK (length(value_name) <= 100),
                description TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversations (
                user_id INTEGER PRIMARY KEY,
                thread_id TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_uservalues_user_id ON uservalues(user_id);
        "#)?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a value inside its own transaction.
    pub fn insert_value(&self, value: &NewValue) -> Result<i64, StoreError> {
        let name = value.name.trim();
        if name.is_empty() || name.chars().count() > MAX_VALUE_NAME_CHARS {
            return Err(StoreError::InvalidValue(format!(
                "value name must be 1-{MAX_VALUE_NAME_CHARS} characters"
            )));
        }
        let description = value.description.trim();
        if description.is_empty() {
            return Err(StoreError::InvalidValue("description is empty".into()));
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO uservalues (user_id, value_name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![value.user_id, name, description, chrono::Utc::now().to_rfc3339()],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!("Saved value {} for user {}", id, value.user_id);
        Ok(id)
    }

    /// All values of a user, oldest first.
    pub fn values_for_user(&self, user_id: i64) -> Result<Vec<ValueRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, value_name, description, created_at
             FROM uservalues WHERE user_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(ValueRecord {
                id: row.get(0)?,
                user_id: row.get(1)?,
                value_name: row.get(2)?,
                description: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn thread_for_user(&self, user_id: i64) -> Result<Option<String>, StoreError> {
        let thread = self
            .conn()
            .query_row(
                "SELECT thread_id FROM conversations WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(thread)
    }

    pub fn set_thread_for_user(&self, user_id: i64, thread_id: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO conversations (user_id, thread_id, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET thread_id = excluded.thread_id, updated_at = excluded.updated_at",
            params![user_id, thread_id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn clear_thread_for_user(&self, user_id: i64) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM conversations WHERE user_id = ?1", params![user_id])?;
        Ok(())
    }
}

#[async_trait]
impl ValueSink for Database {
    async fn insert(&self, value: NewValue) -> Result<i64, StoreError> {
        self.insert_value(&value)
    }
}
