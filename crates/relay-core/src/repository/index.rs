//! Message index port.
//!
//! The index is a derived, queryable cache of what the mailboxes hold: one row
//! per stored message per endpoint. It answers the rate-limit and
//! backpressure queries and backs inbox listings. The mailbox files remain
//! the source of truth.

use chrono::{DateTime, Utc};
use relay_types::error::RepositoryError;
use relay_types::message::{IndexMetrics, MessageRecord, MessageStatus};
use uuid::Uuid;

/// Repository trait for the message index.
pub trait MessageIndex: Send + Sync {
    /// Insert a row. Returns `Conflict` if `(id, endpoint_hash)` already exists.
    fn insert(
        &self,
        record: &MessageRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Change a row's status. Returns `false` when no row matched.
    fn update_status(
        &self,
        id: Uuid,
        endpoint_hash: &str,
        status: MessageStatus,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete one row. Returns `false` when no row matched.
    fn delete(
        &self,
        id: Uuid,
        endpoint_hash: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete every row of an endpoint. Returns the number of rows removed.
    fn delete_endpoint(
        &self,
        endpoint_hash: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    fn get(
        &self,
        id: Uuid,
        endpoint_hash: &str,
    ) -> impl std::future::Future<Output = Result<Option<MessageRecord>, RepositoryError>> + Send;

    /// Rows of one endpoint, newest first, optionally filtered by status.
    fn list_by_endpoint(
        &self,
        endpoint_hash: &str,
        status: Option<MessageStatus>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<MessageRecord>, RepositoryError>> + Send;

    /// Distinct messages sent by `sender` created at or after `since`.
    ///
    /// A message fanned out to several endpoints counts once.
    fn count_sender_in_window(
        &self,
        sender: &str,
        since: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Unprocessed (`new`) rows for one endpoint.
    fn count_new_by_endpoint(
        &self,
        endpoint_hash: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Row counts by status across all endpoints.
    fn metrics(&self) -> impl std::future::Future<Output = Result<IndexMetrics, RepositoryError>> + Send;
}
