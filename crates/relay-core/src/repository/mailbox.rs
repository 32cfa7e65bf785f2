//! Durable mailbox storage port.
//!
//! A mailbox is one endpoint's set of staged directories: `tmp/` for writes in
//! progress, then `new/`, `cur/` and `failed/` for stored messages. Moves
//! between directories are atomic renames, so a message is always either
//! entirely present in exactly one directory or absent.

use relay_types::envelope::Envelope;
use relay_types::error::StorageError;
use relay_types::message::MessageStatus;
use uuid::Uuid;

/// Storage interface for per-endpoint mailboxes.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait MailboxStore: Send + Sync {
    /// Create the mailbox directories for an endpoint if missing.
    fn ensure_mailbox(
        &self,
        endpoint_hash: &str,
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// Write the envelope to `tmp/`, flush it, then rename it into `new/`.
    fn deliver(
        &self,
        endpoint_hash: &str,
        envelope: &Envelope,
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// Atomically move a stored message from one status directory to another.
    ///
    /// Returns `MessageNotFound` when the message is not in `from`.
    fn transition(
        &self,
        endpoint_hash: &str,
        id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// Read a stored message and the directory it currently lives in.
    fn read(
        &self,
        endpoint_hash: &str,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<(Envelope, MessageStatus), StorageError>> + Send;

    /// Delete a stored message from whichever directory holds it.
    fn remove(
        &self,
        endpoint_hash: &str,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// IDs of the messages in one status directory, oldest first.
    fn list(
        &self,
        endpoint_hash: &str,
        status: MessageStatus,
    ) -> impl std::future::Future<Output = Result<Vec<Uuid>, StorageError>> + Send;

    /// Delete an endpoint's mailbox and everything in it.
    fn remove_mailbox(
        &self,
        endpoint_hash: &str,
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;
}
