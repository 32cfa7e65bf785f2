//! Maildir-style durable mailbox storage.
//!
//! Implements `MailboxStore` from `relay-core`. Directory layout per endpoint:
//!
//! ```text
//! {root}/{endpoint_hash}/
//!   tmp/      writes in progress
//!   new/      delivered, not yet consumed
//!   cur/      consumed
//!   failed/   delivery failed after storage
//! ```
//!
//! Each message is one `{messageId}.json` file holding the serialized
//! envelope. Delivery writes the whole file into `tmp/`, fsyncs it, then
//! renames it into `new/`. Renames within one filesystem are atomic, so a
//! reader never sees a partially written message.

use std::path::{Path, PathBuf};

use relay_core::repository::MailboxStore;
use relay_types::envelope::Envelope;
use relay_types::error::StorageError;
use relay_types::message::MessageStatus;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Name of the staging directory.
pub const TMP_DIR: &str = "tmp";

const MESSAGE_EXT: &str = "json";

/// Filesystem-backed mailbox store rooted at `{data_dir}/mailboxes`.
#[derive(Debug, Clone)]
pub struct MaildirStore {
    root: PathBuf,
}

impl MaildirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mailbox directory for an endpoint, rejecting hashes that could
    /// escape the root.
    fn mailbox_dir(&self, endpoint_hash: &str) -> Result<PathBuf, StorageError> {
        let valid = !endpoint_hash.is_empty()
            && endpoint_hash.len() <= 128
            && endpoint_hash
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidEndpoint(endpoint_hash.to_string()));
        }
        Ok(self.root.join(endpoint_hash))
    }

    fn message_path(&self, endpoint_hash: &str, dir: &str, id: Uuid) -> Result<PathBuf, StorageError> {
        Ok(self
            .mailbox_dir(endpoint_hash)?
            .join(dir)
            .join(format!("{id}.{MESSAGE_EXT}")))
    }

    /// Hashes of every mailbox directory under the root.
    pub async fn mailbox_hashes(&self) -> Result<Vec<String>, StorageError> {
        let mut hashes = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(hashes),
            Err(e) => return Err(StorageError::io(&self.root, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.root, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                hashes.push(name.to_string());
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Delete leftovers in every `tmp/` directory.
    ///
    /// Anything still in `tmp/` at startup is a write that never reached its
    /// rename, so it was never visible and was never indexed.
    pub async fn clean_tmp(&self) -> Result<usize, StorageError> {
        let mut removed = 0;
        for hash in self.mailbox_hashes().await? {
            let Ok(dir) = self.mailbox_dir(&hash) else {
                continue;
            };
            let tmp = dir.join(TMP_DIR);
            for path in list_files(&tmp).await? {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StorageError::io(path, e)),
                }
            }
        }
        if removed > 0 {
            tracing::info!(removed, "removed stale tmp files");
        }
        Ok(removed)
    }
}

/// Regular files directly inside `dir`; empty if `dir` does not exist.
async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut files = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(StorageError::io(dir, e)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io(dir, e))?
    {
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if is_file {
            files.push(entry.path());
        }
    }
    Ok(files)
}

fn not_found(endpoint_hash: &str, id: Uuid) -> StorageError {
    StorageError::MessageNotFound {
        endpoint_hash: endpoint_hash.to_string(),
        id,
    }
}

impl MailboxStore for MaildirStore {
    async fn ensure_mailbox(&self, endpoint_hash: &str) -> Result<(), StorageError> {
        let dir = self.mailbox_dir(endpoint_hash)?;
        for sub in [TMP_DIR, "new", "cur", "failed"] {
            let path = dir.join(sub);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
        }
        Ok(())
    }

    async fn deliver(&self, endpoint_hash: &str, envelope: &Envelope) -> Result<(), StorageError> {
        self.ensure_mailbox(endpoint_hash).await?;

        let tmp = self.message_path(endpoint_hash, TMP_DIR, envelope.id)?;
        let target = self.message_path(endpoint_hash, MessageStatus::New.as_str(), envelope.id)?;
        let bytes = serde_json::to_vec(envelope)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &target).await
        }
        .await;

        if let Err(e) = written {
            // Never leave a partial write behind in tmp/.
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(&tmp, e));
        }

        tracing::debug!(endpoint_hash, message_id = %envelope.id, "message stored in new/");
        Ok(())
    }

    async fn transition(
        &self,
        endpoint_hash: &str,
        id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
    ) -> Result<(), StorageError> {
        let source = self.message_path(endpoint_hash, from.as_str(), id)?;
        let target = self.message_path(endpoint_hash, to.as_str(), id)?;
        match tokio::fs::rename(&source, &target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found(endpoint_hash, id)),
            Err(e) => Err(StorageError::io(source, e)),
        }
    }

    async fn read(&self, endpoint_hash: &str, id: Uuid) -> Result<(Envelope, MessageStatus), StorageError> {
        for status in MessageStatus::ALL {
            let path = self.message_path(endpoint_hash, status.as_str(), id)?;
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(path, e)),
            };
            let envelope: Envelope = serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Serialization(format!("{}: {e}", path.display())))?;
            return Ok((envelope, status));
        }
        Err(not_found(endpoint_hash, id))
    }

    async fn remove(&self, endpoint_hash: &str, id: Uuid) -> Result<(), StorageError> {
        for status in MessageStatus::ALL {
            let path = self.message_path(endpoint_hash, status.as_str(), id)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(path, e)),
            }
        }
        Err(not_found(endpoint_hash, id))
    }

    async fn list(&self, endpoint_hash: &str, status: MessageStatus) -> Result<Vec<Uuid>, StorageError> {
        let dir = self.mailbox_dir(endpoint_hash)?.join(status.as_str());
        let mut ids: Vec<Uuid> = list_files(&dir)
            .await?
            .iter()
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(MESSAGE_EXT))
            .filter_map(|p| p.file_stem()?.to_str()?.parse::<Uuid>().ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn remove_mailbox(&self, endpoint_hash: &str) -> Result<(), StorageError> {
        let dir = self.mailbox_dir(endpoint_hash)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::envelope::Budget;
    use tempfile::TempDir;

    const EP: &str = "0123456789abcdef0123456789abcdef";

    fn setup() -> (TempDir, MaildirStore) {
        let tmp = TempDir::new().unwrap();
        let store = MaildirStore::new(tmp.path().join("mailboxes"));
        (tmp, store)
    }

    fn envelope(body: &str) -> Envelope {
        Envelope::new("relay.agent.a", "relay.agent.b", body.as_bytes().to_vec(), Budget::default(), None)
    }

    #[tokio::test]
    async fn deliver_lands_in_new_and_leaves_tmp_empty() {
        let (_tmp, store) = setup();
        let env = envelope("hello");
        store.deliver(EP, &env).await.unwrap();

        assert_eq!(store.list(EP, MessageStatus::New).await.unwrap(), vec![env.id]);
        let tmp_dir = store.root().join(EP).join(TMP_DIR);
        assert!(list_files(&tmp_dir).await.unwrap().is_empty());

        let (read, status) = store.read(EP, env.id).await.unwrap();
        assert_eq!(read, env);
        assert_eq!(status, MessageStatus::New);
    }

    #[tokio::test]
    async fn transition_moves_between_directories() {
        let (_tmp, store) = setup();
        let env = envelope("x");
        store.deliver(EP, &env).await.unwrap();

        store
            .transition(EP, env.id, MessageStatus::New, MessageStatus::Cur)
            .await
            .unwrap();
        assert!(store.list(EP, MessageStatus::New).await.unwrap().is_empty());
        assert_eq!(store.read(EP, env.id).await.unwrap().1, MessageStatus::Cur);

        let err = store
            .transition(EP, env.id, MessageStatus::New, MessageStatus::Cur)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MessageNotFound { .. }));

        store
            .transition(EP, env.id, MessageStatus::Cur, MessageStatus::Failed)
            .await
            .unwrap();
        assert_eq!(store.list(EP, MessageStatus::Failed).await.unwrap(), vec![env.id]);
    }

    #[tokio::test]
    async fn remove_deletes_from_any_directory() {
        let (_tmp, store) = setup();
        let env = envelope("x");
        store.deliver(EP, &env).await.unwrap();
        store
            .transition(EP, env.id, MessageStatus::New, MessageStatus::Cur)
            .await
            .unwrap();

        store.remove(EP, env.id).await.unwrap();
        assert!(matches!(
            store.read(EP, env.id).await,
            Err(StorageError::MessageNotFound { .. })
        ));
        assert!(store.remove(EP, env.id).await.is_err());
    }

    #[tokio::test]
    async fn list_is_sorted_oldest_first() {
        let (_tmp, store) = setup();
        let first = envelope("1");
        let second = envelope("2");
        store.deliver(EP, &second).await.unwrap();
        store.deliver(EP, &first).await.unwrap();

        let mut expected = vec![first.id, second.id];
        expected.sort();
        assert_eq!(store.list(EP, MessageStatus::New).await.unwrap(), expected);
        assert!(store.list("ffff", MessageStatus::New).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn path_traversal_hashes_are_rejected() {
        let (_tmp, store) = setup();
        for bad in ["", "..", "../etc", "a/b", "a.b"] {
            let err = store.ensure_mailbox(bad).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidEndpoint(_)), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn clean_tmp_removes_stale_writes() {
        let (_tmp, store) = setup();
        store.ensure_mailbox(EP).await.unwrap();
        let stale = store.root().join(EP).join(TMP_DIR).join("half-written.json");
        tokio::fs::write(&stale, b"{\"id\":").await.unwrap();

        assert_eq!(store.clean_tmp().await.unwrap(), 1);
        assert!(!stale.exists());
        assert_eq!(store.clean_tmp().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_mailbox_is_idempotent() {
        let (_tmp, store) = setup();
        store.deliver(EP, &envelope("x")).await.unwrap();
        assert_eq!(store.mailbox_hashes().await.unwrap(), vec![EP.to_string()]);

        store.remove_mailbox(EP).await.unwrap();
        store.remove_mailbox(EP).await.unwrap();
        assert!(store.mailbox_hashes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let (_tmp, store) = setup();
        store.ensure_mailbox(EP).await.unwrap();
        let id = Uuid::now_v7();
        let path = store.root().join(EP).join("new").join(format!("{id}.json"));
        tokio::fs::write(&path, b"not json").await.unwrap();

        assert!(matches!(
            store.read(EP, id).await,
            Err(StorageError::Serialization(_))
        ));
    }
}
