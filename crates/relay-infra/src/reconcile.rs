//! Index reconciliation against the mailboxes.
//!
//! The Maildir files are the source of truth and the index is derived from
//! them. After a crash between a rename and the matching index write (or an
//! operator editing a mailbox by hand) the two can disagree. `reconcile`
//! walks every mailbox and brings the index back in line:
//!
//! - a file with no row gets a row, built from the envelope on disk
//! - a row with no file is deleted
//! - a row whose status differs from the file's directory is corrected

use std::collections::HashMap;

use relay_core::repository::{MailboxStore, MessageIndex};
use relay_types::error::{RelayError, StorageError};
use relay_types::message::{MessageRecord, MessageStatus};
use serde::Serialize;
use uuid::Uuid;

use crate::maildir::MaildirStore;
use crate::sqlite::SqliteIndex;

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Rows added for files that had none.
    pub inserted: u64,
    /// Rows deleted because their file is gone.
    pub removed: u64,
    /// Rows whose status was rewritten to match the file's directory.
    pub corrected: u64,
    /// Files that could not be read and were left unindexed.
    pub unreadable: u64,
    /// Stale `tmp/` files removed before the pass (set by the startup path).
    pub tmp_cleaned: u64,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.inserted + self.removed + self.corrected > 0
    }
}

type Key = (Uuid, String);

/// Bring `index` in line with the files in `store`.
pub async fn reconcile(store: &MaildirStore, index: &SqliteIndex) -> Result<ReconcileReport, RelayError> {
    let mut report = ReconcileReport::default();

    let mut files: HashMap<Key, MessageStatus> = HashMap::new();
    for hash in store.mailbox_hashes().await? {
        for status in MessageStatus::ALL {
            let ids = match store.list(&hash, status).await {
                Ok(ids) => ids,
                Err(StorageError::InvalidEndpoint(name)) => {
                    tracing::warn!(dir = %name, "skipping foreign directory in mailbox root");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            for id in ids {
                files.insert((id, hash.clone()), status);
            }
        }
    }

    let mut rows: HashMap<Key, MessageStatus> = index
        .all_rows()
        .await?
        .into_iter()
        .map(|r| ((r.id, r.endpoint_hash), r.status))
        .collect();

    for ((id, hash), status) in &files {
        match rows.remove(&(*id, hash.clone())) {
            Some(indexed) if indexed == *status => {}
            Some(indexed) => {
                index.update_status(*id, hash, *status).await?;
                tracing::debug!(endpoint_hash = %hash, message_id = %id, from = %indexed, to = %status, "index status corrected");
                report.corrected += 1;
            }
            None => {
                let envelope = match store.read(hash, *id).await {
                    Ok((envelope, _)) => envelope,
                    Err(e) => {
                        tracing::warn!(endpoint_hash = %hash, message_id = %id, error = %e, "unreadable message left unindexed");
                        report.unreadable += 1;
                        continue;
                    }
                };
                index
                    .insert(&MessageRecord::for_envelope(&envelope, hash, *status))
                    .await?;
                report.inserted += 1;
            }
        }
    }

    // Whatever is left in `rows` has no file behind it.
    for (id, hash) in rows.into_keys() {
        if index.delete(id, &hash).await? {
            report.removed += 1;
        }
    }

    if report.changed() {
        tracing::info!(
            inserted = report.inserted,
            removed = report.removed,
            corrected = report.corrected,
            "index reconciled with mailboxes"
        );
    }
    Ok(report)
}
