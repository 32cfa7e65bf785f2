//! Assemble a relay from a data directory.
//!
//! Wires the Maildir store, the SQLite index and dead letter queue, the
//! file-backed registries and the config store into a [`LocalRelay`], runs
//! crash recovery, and optionally starts hot-reload watchers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relay_core::RelayCore;
use relay_core::repository::EndpointDirectory;
use relay_types::error::{RelayError, StorageError};

use crate::config::{CONFIG_FILE, ConfigStore};
use crate::maildir::MaildirStore;
use crate::reconcile::{ReconcileReport, reconcile};
use crate::registry::access::ACCESS_RULES_FILE;
use crate::registry::endpoint::ENDPOINTS_FILE;
use crate::registry::{AccessControl, EndpointRegistry};
use crate::sqlite::{DatabasePool, SqliteDeadLetterStore, SqliteIndex};
use crate::watch::{DEFAULT_DEBOUNCE, FileWatchError, HotReload, WatcherHandle, watch_file};

/// The relay over local storage.
pub type LocalRelay = RelayCore<MaildirStore, SqliteIndex, SqliteDeadLetterStore>;

/// Mailbox root inside the data directory.
pub const MAILBOXES_DIR: &str = "mailboxes";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "RELAY_DATA_DIR";

/// Resolve the data directory: `$RELAY_DATA_DIR`, else `~/.relay`, else
/// `./.relay`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".relay");
    }
    PathBuf::from(".relay")
}

/// Errors that can occur while opening a relay.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("failed to create '{path}': {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open index database: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Watch(#[from] FileWatchError),
}

/// Options for opening a relay.
#[derive(Debug, Clone)]
pub struct RelayBuilder {
    data_dir: PathBuf,
    watch: bool,
    debounce: Duration,
    reconcile: bool,
}

impl RelayBuilder {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            watch: false,
            debounce: DEFAULT_DEBOUNCE,
            reconcile: true,
        }
    }

    /// Hot-reload `config.json`, `endpoints.json` and `access-rules.json`.
    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Reconcile the index with the mailboxes on open (default on).
    pub fn reconcile(mut self, reconcile: bool) -> Self {
        self.reconcile = reconcile;
        self
    }

    pub async fn open(self) -> Result<RelayHandle, OpenError> {
        let data_dir = self.data_dir;
        let mailboxes = data_dir.join(MAILBOXES_DIR);
        tokio::fs::create_dir_all(&mailboxes)
            .await
            .map_err(|source| OpenError::CreateDir {
                path: mailboxes.display().to_string(),
                source,
            })?;

        let pool = DatabasePool::open_in(&data_dir).await?;
        let store = MaildirStore::new(&mailboxes);
        let index = SqliteIndex::new(pool.clone());
        let dead_letters = SqliteDeadLetterStore::new(pool);

        let tmp_cleaned = store.clean_tmp().await?;
        let mut recovery = if self.reconcile {
            reconcile(&store, &index).await?
        } else {
            ReconcileReport::default()
        };
        recovery.tmp_cleaned = tmp_cleaned as u64;

        let endpoints = Arc::new(EndpointRegistry::load(data_dir.join(ENDPOINTS_FILE)));
        let access = Arc::new(AccessControl::load(data_dir.join(ACCESS_RULES_FILE)));
        let config = Arc::new(ConfigStore::load(data_dir.join(CONFIG_FILE)));

        let mut watchers = Vec::new();
        if self.watch {
            let targets: [Arc<dyn HotReload>; 3] =
                [config.clone(), endpoints.clone(), access.clone()];
            for target in targets {
                watchers.push(watch_file(target, self.debounce)?);
            }
        }

        let core = RelayCore::new(
            store,
            index,
            dead_letters,
            endpoints.clone(),
            access.clone(),
            config.clone(),
        );

        tracing::info!(
            data_dir = %data_dir.display(),
            endpoints = endpoints.endpoints().len(),
            watching = self.watch,
            "relay opened"
        );

        Ok(RelayHandle {
            core: Arc::new(core),
            endpoints,
            access,
            config,
            data_dir,
            recovery,
            _watchers: watchers,
        })
    }
}

/// Open the relay in `data_dir` with default options.
pub async fn open_relay(data_dir: impl Into<PathBuf>) -> Result<RelayHandle, OpenError> {
    RelayBuilder::new(data_dir).open().await
}

/// An open relay plus the file-backed components it was built from.
///
/// Dropping the handle stops any hot-reload watchers.
pub struct RelayHandle {
    core: Arc<LocalRelay>,
    endpoints: Arc<EndpointRegistry>,
    access: Arc<AccessControl>,
    config: Arc<ConfigStore>,
    data_dir: PathBuf,
    recovery: ReconcileReport,
    _watchers: Vec<WatcherHandle>,
}

impl RelayHandle {
    pub fn core(&self) -> &Arc<LocalRelay> {
        &self.core
    }

    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// What crash recovery did when the relay was opened.
    pub fn recovery(&self) -> ReconcileReport {
        self.recovery
    }

    /// Re-run index reconciliation. Waits for in-flight publishes and
    /// holds new ones off until the pass is done.
    pub async fn reindex(&self) -> Result<ReconcileReport, RelayError> {
        self.core
            .exclusive(reconcile(self.core.store(), self.core.index()))
            .await
    }
}

impl std::fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHandle")
            .field("data_dir", &self.data_dir)
            .field("recovery", &self.recovery)
            .field("watchers", &self._watchers.len())
            .finish_non_exhaustive()
    }
}
