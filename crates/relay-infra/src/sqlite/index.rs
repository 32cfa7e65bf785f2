//! SQLite message index.
//!
//! Implements `MessageIndex` from `relay-core`. Timestamps are stored as
//! epoch milliseconds so window queries are integer comparisons on the
//! `(sender, created_at)` index; `ttl` holds the budget's lifetime in
//! milliseconds.

use chrono::{DateTime, Utc};
use relay_core::repository::MessageIndex;
use relay_types::error::RepositoryError;
use relay_types::message::{IndexMetrics, MessageRecord, MessageStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `MessageIndex`.
#[derive(Clone)]
pub struct SqliteIndex {
    pool: DatabasePool,
}

impl SqliteIndex {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Every row in the index. Used by reconciliation.
    pub async fn all_rows(&self) -> Result<Vec<MessageRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, subject, sender, endpoint_hash, status, created_at, ttl FROM messages",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| MessageRow::from_row(row).map_err(query_err)?.into_record())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct MessageRow {
    id: String,
    subject: String,
    sender: String,
    endpoint_hash: String,
    status: String,
    created_at: i64,
    ttl: i64,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            subject: row.try_get("subject")?,
            sender: row.try_get("sender")?,
            endpoint_hash: row.try_get("endpoint_hash")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            ttl: row.try_get("ttl")?,
        })
    }

    fn into_record(self) -> Result<MessageRecord, RepositoryError> {
        let id = self
            .id
            .parse::<Uuid>()
            .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))?;
        let status = self
            .status
            .parse::<MessageStatus>()
            .map_err(RepositoryError::Query)?;
        let created_at = from_millis(self.created_at)?;
        let expires_at = from_millis(self.created_at.saturating_add(self.ttl))?;

        Ok(MessageRecord {
            id,
            subject: self.subject,
            sender: self.sender,
            endpoint_hash: self.endpoint_hash,
            status,
            created_at,
            expires_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| RepositoryError::Query(format!("timestamp out of range: {ms}")))
}

fn ttl_millis(record: &MessageRecord) -> i64 {
    (record.expires_at - record.created_at).num_milliseconds().max(0)
}

// ---------------------------------------------------------------------------
// MessageIndex impl
// ---------------------------------------------------------------------------

impl MessageIndex for SqliteIndex {
    async fn insert(&self, record: &MessageRecord) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"INSERT INTO messages (id, subject, sender, endpoint_hash, status, created_at, ttl)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        )
        .bind(record.id.to_string())
        .bind(&record.subject)
        .bind(&record.sender)
        .bind(&record.endpoint_hash)
        .bind(record.status.as_str())
        .bind(record.created_at.timestamp_millis())
        .bind(ttl_millis(record))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                RepositoryError::Conflict(format!("{} in {}", record.id, record.endpoint_hash)),
            ),
            Err(e) => Err(query_err(e)),
        }
    }

    async fn update_status(
        &self,
        id: Uuid,
        endpoint_hash: &str,
        status: MessageStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE messages SET status = ?1 WHERE id = ?2 AND endpoint_hash = ?3")
            .bind(status.as_str())
            .bind(id.to_string())
            .bind(endpoint_hash)
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid, endpoint_hash: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?1 AND endpoint_hash = ?2")
            .bind(id.to_string())
            .bind(endpoint_hash)
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_endpoint(&self, endpoint_hash: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM messages WHERE endpoint_hash = ?1")
            .bind(endpoint_hash)
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        Ok(result.rows_affected())
    }

    async fn get(&self, id: Uuid, endpoint_hash: &str) -> Result<Option<MessageRecord>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT id, subject, sender, endpoint_hash, status, created_at, ttl
               FROM messages WHERE id = ?1 AND endpoint_hash = ?2"#,
        )
        .bind(id.to_string())
        .bind(endpoint_hash)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(MessageRow::from_row(&row).map_err(query_err)?.into_record()?)),
            None => Ok(None),
        }
    }

    async fn list_by_endpoint(
        &self,
        endpoint_hash: &str,
        status: Option<MessageStatus>,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, RepositoryError> {
        // UUIDv7 text sorts by creation time.
        let rows = match status {
            Some(status) => sqlx::query(
                r#"SELECT id, subject, sender, endpoint_hash, status, created_at, ttl
                   FROM messages WHERE endpoint_hash = ?1 AND status = ?2
                   ORDER BY id DESC LIMIT ?3"#,
            )
            .bind(endpoint_hash)
            .bind(status.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool.reader)
            .await,
            None => sqlx::query(
                r#"SELECT id, subject, sender, endpoint_hash, status, created_at, ttl
                   FROM messages WHERE endpoint_hash = ?1
                   ORDER BY id DESC LIMIT ?2"#,
            )
            .bind(endpoint_hash)
            .bind(i64::from(limit))
            .fetch_all(&self.pool.reader)
            .await,
        }
        .map_err(query_err)?;

        rows.iter()
            .map(|row| MessageRow::from_row(row).map_err(query_err)?.into_record())
            .collect()
    }

    async fn count_sender_in_window(
        &self,
        sender: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT id) FROM messages WHERE sender = ?1 AND created_at >= ?2",
        )
        .bind(sender)
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?;

        Ok(count.max(0) as u64)
    }

    async fn count_new_by_endpoint(&self, endpoint_hash: &str) -> Result<u64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages WHERE endpoint_hash = ?1 AND status = 'new'",
        )
        .bind(endpoint_hash)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?;

        Ok(count.max(0) as u64)
    }

    async fn metrics(&self) -> Result<IndexMetrics, RepositoryError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM messages GROUP BY status")
                .fetch_all(&self.pool.reader)
                .await
                .map_err(query_err)?;

        let mut metrics = IndexMetrics::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match status.parse::<MessageStatus>().map_err(RepositoryError::Query)? {
                MessageStatus::New => metrics.new = count,
                MessageStatus::Cur => metrics.cur = count,
                MessageStatus::Failed => metrics.failed = count,
            }
        }
        Ok(metrics)
    }
}
