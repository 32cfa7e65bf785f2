//! SQLite dead letter queue.
//!
//! Stores the full original envelope as JSON next to the endpoint hash and
//! the failure reason. Rows are append-only apart from age-based purging.

use chrono::{DateTime, Utc};
use relay_core::repository::DeadLetterStore;
use relay_types::dead_letter::DeadLetterEntry;
use relay_types::envelope::Envelope;
use relay_types::error::RepositoryError;
use sqlx::Row;

use super::index::{from_millis, query_err};
use super::pool::DatabasePool;

/// SQLite-backed implementation of `DeadLetterStore`.
#[derive(Clone)]
pub struct SqliteDeadLetterStore {
    pool: DatabasePool,
}

impl SqliteDeadLetterStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct DeadLetterRow {
    endpoint_hash: String,
    reason: String,
    envelope: String,
    rejected_at: i64,
}

impl DeadLetterRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            endpoint_hash: row.try_get("endpoint_hash")?,
            reason: row.try_get("reason")?,
            envelope: row.try_get("envelope")?,
            rejected_at: row.try_get("rejected_at")?,
        })
    }

    fn into_entry(self) -> Result<DeadLetterEntry, RepositoryError> {
        let original_envelope: Envelope = serde_json::from_str(&self.envelope)
            .map_err(|e| RepositoryError::Query(format!("invalid envelope JSON: {e}")))?;
        Ok(DeadLetterEntry {
            original_envelope,
            endpoint_hash: self.endpoint_hash,
            reason: self.reason,
            rejected_at: from_millis(self.rejected_at)?,
        })
    }
}

impl DeadLetterStore for SqliteDeadLetterStore {
    async fn record(&self, entry: &DeadLetterEntry) -> Result<(), RepositoryError> {
        let envelope = serde_json::to_string(&entry.original_envelope)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize envelope: {e}")))?;

        sqlx::query(
            r#"INSERT INTO dead_letters (message_id, endpoint_hash, reason, envelope, rejected_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
        )
        .bind(entry.original_envelope.id.to_string())
        .bind(&entry.endpoint_hash)
        .bind(&entry.reason)
        .bind(envelope)
        .bind(entry.rejected_at.timestamp_millis())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn list(
        &self,
        endpoint_hash: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DeadLetterEntry>, RepositoryError> {
        let rows = match endpoint_hash {
            Some(hash) => sqlx::query(
                r#"SELECT endpoint_hash, reason, envelope, rejected_at FROM dead_letters
                   WHERE endpoint_hash = ?1 ORDER BY seq DESC LIMIT ?2"#,
            )
            .bind(hash)
            .bind(i64::from(limit))
            .fetch_all(&self.pool.reader)
            .await,
            None => sqlx::query(
                r#"SELECT endpoint_hash, reason, envelope, rejected_at FROM dead_letters
                   ORDER BY seq DESC LIMIT ?1"#,
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool.reader)
            .await,
        }
        .map_err(query_err)?;

        rows.iter()
            .map(|row| DeadLetterRow::from_row(row).map_err(query_err)?.into_entry())
            .collect()
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_err)?;
        Ok(count.max(0) as u64)
    }

    async fn purge_before(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM dead_letters WHERE rejected_at < ?1")
            .bind(before.timestamp_millis())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected())
    }
}
