//! Hot reload of registry and config files.
//!
//! Each watched file is reloaded in place when it changes on disk. The
//! parent directory is watched (non-recursively) rather than the file
//! itself, since atomic tmp+rename writes replace the inode and editors do
//! the same. Events are filtered down to the target file name.
//!
//! A reload that fails to parse or validate is logged; the component keeps
//! serving its previous snapshot.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, DebouncedEvent, Debouncer, new_debouncer};
use relay_types::error::ConfigError;

/// Default debounce window for file change bursts.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Errors that can occur while setting up a file watch.
#[derive(Debug, thiserror::Error)]
pub enum FileWatchError {
    #[error("watcher creation failed: {0}")]
    WatcherCreation(String),

    #[error("failed to watch path '{path}': {reason}")]
    WatchPath { path: String, reason: String },

    #[error("path has no parent directory or file name: {0}")]
    InvalidTarget(String),
}

/// A component backed by a file that can re-read itself.
pub trait HotReload: Send + Sync {
    /// The file whose changes trigger a reload.
    fn watched_path(&self) -> &Path;

    /// Re-read the file and swap in the new state. Must leave the previous
    /// state active on error.
    fn reload_from_disk(&self) -> Result<(), ConfigError>;
}

/// RAII handle that keeps a file watcher alive. Dropping it stops the watch.
pub struct WatcherHandle {
    _debouncer: Debouncer<RecommendedWatcher>,
    watched_path: PathBuf,
}

impl WatcherHandle {
    pub fn watched_path(&self) -> &Path {
        &self.watched_path
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("watched_path", &self.watched_path)
            .finish_non_exhaustive()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        tracing::debug!(path = %self.watched_path.display(), "file watcher dropped");
    }
}

/// True if any event in the batch touches a file named `file_name`.
pub fn touches_file(events: &[DebouncedEvent], file_name: &OsStr) -> bool {
    events
        .iter()
        .any(|event| event.path.file_name() == Some(file_name))
}

/// Start watching `target.watched_path()` and reload `target` on change.
pub fn watch_file(
    target: Arc<dyn HotReload>,
    debounce: Duration,
) -> Result<WatcherHandle, FileWatchError> {
    let path = target.watched_path().to_path_buf();
    let invalid = || FileWatchError::InvalidTarget(path.display().to_string());
    let file_name = path.file_name().ok_or_else(invalid)?.to_os_string();
    let parent = match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Path::new("."),
        Some(p) => p,
        None => return Err(invalid()),
    }
    .to_path_buf();

    let label = path.display().to_string();
    let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
        Ok(events) => {
            if !touches_file(&events, &file_name) {
                return;
            }
            match target.reload_from_disk() {
                Ok(()) => tracing::debug!(path = %label, "hot reload applied"),
                Err(e) => tracing::warn!(
                    path = %label,
                    error = %e,
                    "hot reload rejected, keeping previous state"
                ),
            }
        }
        Err(err) => tracing::warn!(path = %label, error = %err, "file watcher error"),
    })
    .map_err(|e| FileWatchError::WatcherCreation(e.to_string()))?;

    debouncer
        .watcher()
        .watch(&parent, RecursiveMode::NonRecursive)
        .map_err(|e| FileWatchError::WatchPath {
            path: parent.display().to_string(),
            reason: e.to_string(),
        })?;

    tracing::info!(path = %path.display(), "file watcher started");

    Ok(WatcherHandle {
        _debouncer: debouncer,
        watched_path: path,
    })
}
