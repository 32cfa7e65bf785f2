//! In-memory port implementations for orchestrator tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use relay_types::dead_letter::DeadLetterEntry;
use relay_types::endpoint::Endpoint;
use relay_types::envelope::Envelope;
use relay_types::error::{RepositoryError, StorageError};
use relay_types::message::{IndexMetrics, MessageRecord, MessageStatus};
use tokio::sync::Notify;
use uuid::Uuid;

use super::{DeadLetterStore, EndpointDirectory, MailboxStore, MessageIndex};

#[derive(Default)]
pub struct MemoryMailbox {
    messages: Mutex<HashMap<(String, Uuid), (Envelope, MessageStatus)>>,
    mailboxes: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    pub deliver_attempts: AtomicUsize,
}

impl MemoryMailbox {
    /// Make every delivery to `endpoint_hash` fail with an I/O error.
    pub fn fail_endpoint(&self, endpoint_hash: &str) {
        self.failing.lock().unwrap().insert(endpoint_hash.to_string());
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.deliver_attempts.load(Ordering::SeqCst)
    }

    pub fn status_of(&self, endpoint_hash: &str, id: Uuid) -> Option<MessageStatus> {
        self.messages
            .lock()
            .unwrap()
            .get(&(endpoint_hash.to_string(), id))
            .map(|(_, s)| *s)
    }

    pub fn stored_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn has_mailbox(&self, endpoint_hash: &str) -> bool {
        self.mailboxes.lock().unwrap().contains(endpoint_hash)
    }
}

impl MailboxStore for MemoryMailbox {
    async fn ensure_mailbox(&self, endpoint_hash: &str) -> Result<(), StorageError> {
        self.mailboxes.lock().unwrap().insert(endpoint_hash.to_string());
        Ok(())
    }

    async fn deliver(&self, endpoint_hash: &str, envelope: &Envelope) -> Result<(), StorageError> {
        self.deliver_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(endpoint_hash) {
            return Err(StorageError::io(
                format!("mem/{endpoint_hash}/tmp"),
                std::io::Error::other("disk full"),
            ));
        }
        self.messages.lock().unwrap().insert(
            (endpoint_hash.to_string(), envelope.id),
            (envelope.clone(), MessageStatus::New),
        );
        Ok(())
    }

    async fn transition(
        &self,
        endpoint_hash: &str,
        id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
    ) -> Result<(), StorageError> {
        let mut messages = self.messages.lock().unwrap();
        match messages.get_mut(&(endpoint_hash.to_string(), id)) {
            Some((_, status)) if *status == from => {
                *status = to;
                Ok(())
            }
            _ => Err(StorageError::MessageNotFound {
                endpoint_hash: endpoint_hash.to_string(),
                id,
            }),
        }
    }

    async fn read(&self, endpoint_hash: &str, id: Uuid) -> Result<(Envelope, MessageStatus), StorageError> {
        self.messages
            .lock()
            .unwrap()
            .get(&(endpoint_hash.to_string(), id))
            .cloned()
            .ok_or_else(|| StorageError::MessageNotFound {
                endpoint_hash: endpoint_hash.to_string(),
                id,
            })
    }

    async fn remove(&self, endpoint_hash: &str, id: Uuid) -> Result<(), StorageError> {
        self.messages
            .lock()
            .unwrap()
            .remove(&(endpoint_hash.to_string(), id))
            .map(|_| ())
            .ok_or_else(|| StorageError::MessageNotFound {
                endpoint_hash: endpoint_hash.to_string(),
                id,
            })
    }

    async fn list(&self, endpoint_hash: &str, status: MessageStatus) -> Result<Vec<Uuid>, StorageError> {
        let mut ids: Vec<Uuid> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|((hash, _), (_, s))| hash == endpoint_hash && *s == status)
            .map(|((_, id), _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn remove_mailbox(&self, endpoint_hash: &str) -> Result<(), StorageError> {
        self.messages
            .lock()
            .unwrap()
            .retain(|(hash, _), _| hash != endpoint_hash);
        self.mailboxes.lock().unwrap().remove(endpoint_hash);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryIndex {
    rows: Mutex<Vec<MessageRecord>>,
    pub fail_inserts: AtomicBool,
    pub fail_updates: AtomicBool,
    gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl MemoryIndex {
    pub fn rows(&self) -> Vec<MessageRecord> {
        self.rows.lock().unwrap().clone()
    }

    /// Park the next mailbox size query. Returns `(entered, release)`:
    /// `entered` fires once the query is parked, `release` lets it finish.
    pub fn gate_next_size_query(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some((Arc::clone(&entered), Arc::clone(&release)));
        (entered, release)
    }
}

impl MessageIndex for MemoryIndex {
    async fn insert(&self, record: &MessageRecord) -> Result<(), RepositoryError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("database is locked".into()));
        }
        let mut rows = self.rows.lock().unwrap();
        if rows
            .iter()
            .any(|r| r.id == record.id && r.endpoint_hash == record.endpoint_hash)
        {
            return Err(RepositoryError::Conflict(record.id.to_string()));
        }
        rows.push(record.clone());
        Ok(())
    }

    async fn update_status(&self, id: Uuid, endpoint_hash: &str, status: MessageStatus) -> Result<bool, RepositoryError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("database is locked".into()));
        }
        let mut rows = self.rows.lock().unwrap();
        match rows
            .iter_mut()
            .find(|r| r.id == id && r.endpoint_hash == endpoint_hash)
        {
            Some(row) => {
                row.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid, endpoint_hash: &str) -> Result<bool, RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| !(r.id == id && r.endpoint_hash == endpoint_hash));
        Ok(rows.len() < before)
    }

    async fn delete_endpoint(&self, endpoint_hash: &str) -> Result<u64, RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.endpoint_hash != endpoint_hash);
        Ok((before - rows.len()) as u64)
    }

    async fn get(&self, id: Uuid, endpoint_hash: &str) -> Result<Option<MessageRecord>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id && r.endpoint_hash == endpoint_hash)
            .cloned())
    }

    async fn list_by_endpoint(
        &self,
        endpoint_hash: &str,
        status: Option<MessageStatus>,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, RepositoryError> {
        let mut hits: Vec<MessageRecord> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.endpoint_hash == endpoint_hash && status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.id.cmp(&a.id));
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn count_sender_in_window(&self, sender: &str, since: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let ids: HashSet<Uuid> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.sender == sender && r.created_at >= since)
            .map(|r| r.id)
            .collect();
        Ok(ids.len() as u64)
    }

    async fn count_new_by_endpoint(&self, endpoint_hash: &str) -> Result<u64, RepositoryError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.endpoint_hash == endpoint_hash && r.status == MessageStatus::New)
            .count() as u64)
    }

    async fn metrics(&self) -> Result<IndexMetrics, RepositoryError> {
        let mut metrics = IndexMetrics::default();
        for row in self.rows.lock().unwrap().iter() {
            match row.status {
                MessageStatus::New => metrics.new += 1,
                MessageStatus::Cur => metrics.cur += 1,
                MessageStatus::Failed => metrics.failed += 1,
            }
        }
        Ok(metrics)
    }
}

#[derive(Default)]
pub struct MemoryDeadLetters {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl MemoryDeadLetters {
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl DeadLetterStore for MemoryDeadLetters {
    async fn record(&self, entry: &DeadLetterEntry) -> Result<(), RepositoryError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn list(&self, endpoint_hash: Option<&str>, limit: u32) -> Result<Vec<DeadLetterEntry>, RepositoryError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|e| endpoint_hash.is_none_or(|h| e.endpoint_hash == h))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.entries.lock().unwrap().len() as u64)
    }

    async fn purge_before(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut entries = self.entries.lock().unwrap();
        let len = entries.len();
        entries.retain(|e| e.rejected_at >= before);
        Ok((len - entries.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryEndpoints {
    endpoints: Mutex<BTreeMap<String, Endpoint>>,
}

/// Readable stand-in for the content hash used in production.
pub fn test_hash(subject: &str) -> String {
    subject.replace('.', "_").replace('*', "star").replace('>', "tail")
}

impl EndpointDirectory for MemoryEndpoints {
    fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.lock().unwrap().values().cloned().collect()
    }

    fn get(&self, subject: &str) -> Option<Endpoint> {
        self.endpoints.lock().unwrap().get(subject).cloned()
    }

    fn by_hash(&self, hash: &str) -> Option<Endpoint> {
        self.endpoints
            .lock()
            .unwrap()
            .values()
            .find(|e| e.hash == hash)
            .cloned()
    }

    fn register(&self, subject: &str) -> Result<Endpoint, StorageError> {
        let mut endpoints = self.endpoints.lock().unwrap();
        let endpoint = endpoints
            .entry(subject.to_string())
            .or_insert_with(|| Endpoint {
                subject: subject.to_string(),
                hash: test_hash(subject),
                registered_at: Utc::now(),
            });
        Ok(endpoint.clone())
    }

    fn unregister(&self, subject: &str) -> Result<Option<Endpoint>, StorageError> {
        Ok(self.endpoints.lock().unwrap().remove(subject))
    }
}
