//! Dead letter queue port.

use chrono::{DateTime, Utc};
use relay_types::dead_letter::DeadLetterEntry;
use relay_types::error::RepositoryError;

/// Append-only store of delivery failures.
pub trait DeadLetterStore: Send + Sync {
    fn record(
        &self,
        entry: &DeadLetterEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Entries newest first, optionally for one endpoint only.
    fn list(
        &self,
        endpoint_hash: Option<&str>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<DeadLetterEntry>, RepositoryError>> + Send;

    fn count(&self) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Drop entries rejected before `before`. Returns the number removed.
    fn purge_before(
        &self,
        before: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
