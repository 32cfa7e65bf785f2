//! Reliability configuration loader.
//!
//! Reads `config.json` from the data directory into a [`RelayConfig`] and
//! keeps the reliability section as a hot-reloadable snapshot. A missing file
//! means defaults. A file that fails to read, parse or validate is logged and
//! the previous snapshot stays in force (defaults on first load).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use relay_core::reliability::ReliabilitySource;
use relay_types::config::{RelayConfig, ReliabilityConfig};
use relay_types::error::ConfigError;

use crate::registry::read_json;
use crate::snapshot::Snapshot;
use crate::watch::HotReload;

/// Config file name inside the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// Hot-reloaded reliability configuration.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    snapshot: Snapshot<ReliabilityConfig>,
}

impl ConfigStore {
    /// Load from `path`, falling back to defaults when the file is missing or
    /// unusable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match parse(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("{err}, using default reliability config");
                ReliabilityConfig::default()
            }
        };
        Self {
            path,
            snapshot: Snapshot::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The active configuration.
    pub fn current(&self) -> Arc<ReliabilityConfig> {
        self.snapshot.load()
    }

    /// Increases by one on every successful reload.
    pub fn version(&self) -> u64 {
        self.snapshot.version()
    }

    /// Re-read the file and swap it in. Returns the new version.
    pub fn reload(&self) -> Result<u64, ConfigError> {
        let config = parse(&self.path)?;
        let version = self.snapshot.store(config);
        tracing::info!(version, path = %self.path.display(), "reliability config reloaded");
        Ok(version)
    }
}

fn parse(path: &Path) -> Result<ReliabilityConfig, ConfigError> {
    let Some(config) = read_json::<RelayConfig>(path)? else {
        tracing::debug!("no {} found, using defaults", path.display());
        return Ok(ReliabilityConfig::default());
    };
    config.reliability.validate()?;
    Ok(config.reliability)
}

impl ReliabilitySource for ConfigStore {
    fn reliability(&self) -> Arc<ReliabilityConfig> {
        self.current()
    }
}

impl HotReload for ConfigStore {
    fn watched_path(&self) -> &Path {
        &self.path
    }

    fn reload_from_disk(&self) -> Result<(), ConfigError> {
        self.reload().map(|_| ())
    }
}
