//! File-backed, hot-reloaded registries: endpoints and access rules.
//!
//! Both keep an immutable snapshot behind `RwLock<Arc<_>>`. Readers clone the
//! `Arc` and never block a reload; a reload parses and validates the whole
//! file before swapping, so a bad edit leaves the previous snapshot active.

pub mod access;
pub mod endpoint;

use std::path::Path;

use relay_types::error::{ConfigError, StorageError};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use access::AccessControl;
pub use endpoint::{EndpointRegistry, hash_subject};

/// Read and parse a JSON file. `Ok(None)` when the file does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                reason: e.to_string(),
            });
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Write `value` as pretty JSON via a sibling temp file and a rename, so a
/// watcher never observes a half-written file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| StorageError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| StorageError::io(path, e))
}
