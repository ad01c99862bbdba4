use crate::error::{Result, RelayError};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod types;
pub use types::MessageRecord;

/// Durable log of inbound messages and their responses
///
/// Writes are two-phase: `insert_inbound` before the agent call and
/// `record_response` after it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Persist an inbound message with no response and return its identifier
    async fn insert_inbound(&self, user_id: &str, message: &str) -> Result<i64>;

    /// Store the serialized response for message `id`
    async fn record_response(&self, id: i64, response: String) -> Result<()>;

    /// Remove message `id` if it has no response yet
    ///
    /// Returns whether a record was removed. A record that already holds a
    /// response is left untouched.
    async fn rollback_inbound(&self, id: i64) -> Result<bool>;

    /// Fetch message `id`
    async fn get(&self, id: i64) -> Result<Option<MessageRecord>>;

    /// Most recent messages for `user_id`, newest first
    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<MessageRecord>>;
}

/// SQLite-backed message log
///
/// Opens a connection per operation and runs it on the blocking pool, so
/// the handle itself is cheap to share.
#[derive(Debug, Clone)]
pub struct SqliteMessageLog {
    db_path: PathBuf,
}

impl SqliteMessageLog {
    /// Create a message log in the user's data directory
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be determined or created,
    /// or the schema cannot be initialized
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "chatrelay", "chatrelay")
            .ok_or_else(|| RelayError::Storage("Could not determine data directory".into()))?;

        Self::new_with_path(proj_dirs.data_dir().join("messages.db"))
    }

    /// Create a message log at `db_path`
    ///
    /// # Examples
    ///
    /// ```
    /// use chatrelay::storage::SqliteMessageLog;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let log = SqliteMessageLog::new_with_path(dir.path().join("messages.db")).unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| RelayError::Storage(e.to_string()))?;
        }

        let log = Self { db_path };
        log.init()?;
        tracing::info!(path = %log.db_path.display(), "Message log ready");
        Ok(log)
    }

    /// Open from an optional configured path, falling back to the data directory
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be created
    pub fn open(db_path: Option<&Path>) -> Result<Self> {
        match db_path {
            Some(path) => Self::new_with_path(path),
            None => Self::new(),
        }
    }

    /// Database file location
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path)
            .context("Failed to open database")
            .map_err(|e| RelayError::Storage(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| RelayError::Storage(e.to_string()))?;
        Ok(conn)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = Self::connect(&self.db_path)?;

        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .context("Failed to enable WAL")
            .map_err(|e| RelayError::Storage(e.to_string()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS user_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                message TEXT NOT NULL,
                ai_response TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_user_messages_user_id
                ON user_messages (user_id, id);",
        )
        .context("Failed to create tables")
        .map_err(|e| RelayError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn with_connection<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Self::connect(&db_path)?;
            op(&mut conn)
        })
        .await
        .map_err(|e| RelayError::Storage(format!("Database task failed: {}", e)))?
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let created_at_str: String = row.get(4)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(MessageRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message: row.get(2)?,
        ai_response: row.get(3)?,
        created_at,
    })
}

#[async_trait]
impl MessageLog for SqliteMessageLog {
    async fn insert_inbound(&self, user_id: &str, message: &str) -> Result<i64> {
        let user_id = user_id.to_string();
        let message = message.to_string();
        self.with_connection(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO user_messages (user_id, message, ai_response, created_at)
                VALUES (?, ?, NULL, ?)",
                params![user_id, message, now],
            )
            .context("Failed to insert message")
            .map_err(|e| RelayError::Storage(e.to_string()))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn record_response(&self, id: i64, response: String) -> Result<()> {
        self.with_connection(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE user_messages SET ai_response = ? WHERE id = ?",
                    params![response, id],
                )
                .context("Failed to update message")
                .map_err(|e| RelayError::Storage(e.to_string()))?;
            if updated == 0 {
                return Err(RelayError::Storage(format!("Message {} not found", id)).into());
            }
            Ok(())
        })
        .await
    }

    async fn rollback_inbound(&self, id: i64) -> Result<bool> {
        self.with_connection(move |conn| {
            let tx = conn
                .transaction()
                .context("Failed to start transaction")
                .map_err(|e| RelayError::Storage(e.to_string()))?;

            let removed = tx
                .execute(
                    "DELETE FROM user_messages WHERE id = ? AND ai_response IS NULL",
                    params![id],
                )
                .context("Failed to roll back message")
                .map_err(|e| RelayError::Storage(e.to_string()))?;

            tx.commit()
                .context("Failed to commit transaction")
                .map_err(|e| RelayError::Storage(e.to_string()))?;

            Ok(removed > 0)
        })
        .await
    }

    async fn get(&self, id: i64) -> Result<Option<MessageRecord>> {
        self.with_connection(move |conn| {
            conn.query_row(
                "SELECT id, user_id, message, ai_response, created_at
                FROM user_messages WHERE id = ?",
                params![id],
                row_to_record,
            )
            .optional()
            .context("Failed to query message")
            .map_err(|e| anyhow::Error::from(RelayError::Storage(e.to_string())))
        })
        .await
    }

    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<MessageRecord>> {
        let user_id = user_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, message, ai_response, created_at
                    FROM user_messages
                    WHERE user_id = ?
                    ORDER BY id DESC
                    LIMIT ?",
                )
                .context("Failed to prepare statement")
                .map_err(|e| RelayError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(params![user_id, limit], row_to_record)
                .context("Failed to query messages")
                .map_err(|e| RelayError::Storage(e.to_string()))?;

            let mut records = Vec::new();
            for record in rows.flatten() {
                records.push(record);
            }
            Ok(records)
        })
        .await
    }
}
