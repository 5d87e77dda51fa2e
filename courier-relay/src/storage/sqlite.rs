//! SQLite message store backend.

use super::{AppendMessage, MessageStore, StoredMessage};
use crate::error::StoreError;
use async_trait::async_trait;
use courier_types::{MessageId, UserId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// SQLite-based message store.
///
/// Uses WAL mode for concurrent reads/writes. Recipient and sender are
/// indexed so `pending_for` and the account-deletion cascade avoid full
/// table scans.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from a database path.
    ///
    /// Creates the database file if it doesn't exist.
    pub async fn new(path: &Path) -> Result<Self, StoreError> {
        let path_str = path.to_str().ok_or_else(|| StoreError::InvalidPath {
            path: path.to_path_buf(),
        })?;

        let options = SqliteConnectOptions::from_str(path_str)
            .map_err(StoreError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StoreError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id BLOB NOT NULL UNIQUE,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                payload BLOB NOT NULL,
                nonce TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient)")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender)")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(())
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, req: AppendMessage) -> Result<StoredMessage, StoreError> {
        let id = MessageId::new();

        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;

        // Clamp to the highest stored timestamp so created_at stays
        // non-decreasing in insertion order even if the clock steps back.
        let max_ts: Option<i64> = sqlx::query_scalar("SELECT MAX(created_at) FROM messages")
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::Database)?;
        let created_at = Self::current_timestamp().max(max_ts.unwrap_or(0));

        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (message_id, sender, recipient, payload, nonce, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING seq
            "#,
        )
        .bind(id.as_bytes())
        .bind(req.from.as_str())
        .bind(req.to.as_str())
        .bind(&req.payload)
        .bind(&req.nonce)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::Database)?;

        tx.commit().await.map_err(StoreError::Database)?;

        Ok(StoredMessage {
            id,
            from: req.from,
            to: req.to,
            payload: req.payload,
            nonce: req.nonce,
            created_at,
            seq: seq as u64,
        })
    }

    async fn pending_for(&self, identity: &UserId) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT seq, message_id, sender, recipient, payload, nonce, created_at
            FROM messages
            WHERE recipient = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(identity.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    async fn delete_many(
        &self,
        identity: &UserId,
        ids: &[MessageId],
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;
        let mut deleted = 0;

        for id in ids {
            // Ownership enforced in the predicate: only inbound messages
            // of `identity` match. Everything else silently skips.
            let result = sqlx::query(
                "DELETE FROM messages WHERE message_id = ?1 AND recipient = ?2",
            )
            .bind(id.as_bytes())
            .bind(identity.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Database)?;

            deleted += result.rows_affected();
        }

        tx.commit().await.map_err(StoreError::Database)?;
        Ok(deleted)
    }

    async fn delete_all_for(&self, identity: &UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE sender = ?1 OR recipient = ?1")
            .bind(identity.as_str())
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(result.rows_affected())
    }

    async fn total_messages(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(count as u64)
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct MessageRow {
    seq: i64,
    message_id: Vec<u8>,
    sender: String,
    recipient: String,
    payload: Vec<u8>,
    nonce: String,
    created_at: i64,
}

impl TryFrom<MessageRow> for StoredMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(StoredMessage {
            id: MessageId::from_bytes(&row.message_id).ok_or_else(|| {
                StoreError::CorruptRecord {
                    reason: format!("message_id has {} bytes, want 16", row.message_id.len()),
                }
            })?,
            from: UserId::new(row.sender),
            to: UserId::new(row.recipient),
            payload: row.payload,
            nonce: row.nonce,
            created_at: row.created_at,
            seq: row.seq as u64,
        })
    }
}
