//! File-backed endpoint registry.
//!
//! Implements `EndpointDirectory` from `relay-core`. Endpoints persist in
//! `endpoints.json`:
//!
//! ```json
//! { "endpoints": [ { "subject": "relay.agent.alpha", "hash": "…", "registeredAt": "…" } ] }
//! ```
//!
//! The hash is always recomputed from the subject on load, so an edited or
//! stale `hash` field in the file cannot point a subject at another mailbox.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use relay_core::repository::EndpointDirectory;
use relay_core::subject;
use relay_types::endpoint::Endpoint;
use relay_types::error::{ConfigError, StorageError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{read_json, write_json_atomic};
use crate::snapshot::Snapshot;
use crate::watch::HotReload;

/// Registry file name inside the data directory.
pub const ENDPOINTS_FILE: &str = "endpoints.json";

/// Stable mailbox key for a subject: the first 16 bytes of its SHA-256
/// digest as lowercase hex (32 characters).
pub fn hash_subject(subject: &str) -> String {
    let digest = Sha256::digest(subject.as_bytes());
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EndpointsFile {
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

type EndpointMap = BTreeMap<String, Endpoint>;

/// Subject -> endpoint map persisted to `endpoints.json`.
#[derive(Debug)]
pub struct EndpointRegistry {
    path: PathBuf,
    snapshot: Snapshot<EndpointMap>,
    /// Serializes read-modify-write of the file.
    write_lock: Mutex<()>,
}

impl EndpointRegistry {
    /// Load the registry from `path`. A missing file is an empty registry;
    /// an unreadable one is logged and also treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match parse(&path) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(error = %e, "endpoint registry unreadable, starting empty");
                EndpointMap::new()
            }
        };
        tracing::debug!(path = %path.display(), endpoints = map.len(), "endpoint registry loaded");
        Self {
            path,
            snapshot: Snapshot::new(map),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of reloads and writes since load, plus one.
    pub fn version(&self) -> u64 {
        self.snapshot.version()
    }

    /// Re-read the file. On error the current snapshot stays active.
    pub fn reload(&self) -> Result<usize, ConfigError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let map = parse(&self.path)?;
        let count = map.len();
        self.snapshot.store(map);
        tracing::info!(endpoints = count, "endpoint registry reloaded");
        Ok(count)
    }

    /// Apply `change` to a copy of the current map, persist it, then swap.
    fn modify<R>(&self, change: impl FnOnce(&mut EndpointMap) -> R) -> Result<R, StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = (*self.snapshot.load()).clone();
        let out = change(&mut map);
        let file = EndpointsFile {
            endpoints: map.values().cloned().collect(),
        };
        write_json_atomic(&self.path, &file)?;
        self.snapshot.store(map);
        Ok(out)
    }
}

fn parse(path: &Path) -> Result<EndpointMap, ConfigError> {
    let Some(file) = read_json::<EndpointsFile>(path)? else {
        return Ok(EndpointMap::new());
    };
    let mut map = EndpointMap::new();
    for mut endpoint in file.endpoints {
        subject::validate_pattern(&endpoint.subject).map_err(|e| {
            ConfigError::Invalid(format!("endpoint subject '{}': {e}", endpoint.subject))
        })?;
        endpoint.hash = hash_subject(&endpoint.subject);
        map.insert(endpoint.subject.clone(), endpoint);
    }
    Ok(map)
}

impl EndpointDirectory for EndpointRegistry {
    fn endpoints(&self) -> Vec<Endpoint> {
        self.snapshot.load().values().cloned().collect()
    }

    fn get(&self, subject: &str) -> Option<Endpoint> {
        self.snapshot.load().get(subject).cloned()
    }

    fn by_hash(&self, hash: &str) -> Option<Endpoint> {
        self.snapshot
            .load()
            .values()
            .find(|e| e.hash == hash)
            .cloned()
    }

    fn register(&self, subject: &str) -> Result<Endpoint, StorageError> {
        if let Some(existing) = self.get(subject) {
            return Ok(existing);
        }
        self.modify(|map| {
            map.entry(subject.to_string())
                .or_insert_with(|| Endpoint {
                    subject: subject.to_string(),
                    hash: hash_subject(subject),
                    registered_at: Utc::now(),
                })
                .clone()
        })
    }

    fn unregister(&self, subject: &str) -> Result<Option<Endpoint>, StorageError> {
        if self.get(subject).is_none() {
            return Ok(None);
        }
        self.modify(|map| map.remove(subject))
    }
}

impl HotReload for EndpointRegistry {
    fn watched_path(&self) -> &Path {
        &self.path
    }

    fn reload_from_disk(&self) -> Result<(), ConfigError> {
        self.reload().map(|_| ())
    }
}
