//! File-backed access control.
//!
//! Rules live in `access-rules.json`:
//!
//! ```json
//! { "rules": [ { "priority": 10, "subjectPattern": "relay.admin.>", "senderScope": ">", "effect": "deny" } ] }
//! ```
//!
//! The whole file is validated before it replaces the active rule set.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use relay_core::access::{AccessPolicy, AccessRuleSet};
use relay_types::access::{AccessDecision, AccessRule};
use relay_types::error::{ConfigError, RelayError, StorageError};
use serde::{Deserialize, Serialize};

use super::{read_json, write_json_atomic};
use crate::snapshot::Snapshot;
use crate::watch::HotReload;

/// Rule file name inside the data directory.
pub const ACCESS_RULES_FILE: &str = "access-rules.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<AccessRule>,
}

/// Hot-reloaded access rules.
#[derive(Debug)]
pub struct AccessControl {
    path: PathBuf,
    snapshot: Snapshot<AccessRuleSet>,
    write_lock: Mutex<()>,
}

impl AccessControl {
    /// Load rules from `path`. Missing file means no rules (allow all); a
    /// bad file is logged and also starts with no rules.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let rules = parse(&path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "access rules unreadable, starting with none");
            AccessRuleSet::default()
        });
        Self {
            path,
            snapshot: Snapshot::new(rules),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u64 {
        self.snapshot.version()
    }

    /// Rules in evaluation order.
    pub fn list_rules(&self) -> Vec<AccessRule> {
        self.snapshot.load().rules().to_vec()
    }

    /// Re-read the file. On error the previous rule set stays active.
    pub fn reload(&self) -> Result<usize, ConfigError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let rules = parse(&self.path)?;
        let count = rules.rules().len();
        self.snapshot.store(rules);
        tracing::info!(rules = count, "access rules reloaded");
        Ok(count)
    }

    /// Add a rule and persist the rule file.
    pub fn add_rule(&self, rule: AccessRule) -> Result<(), RelayError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let rules = self
            .snapshot
            .load()
            .with_rule(rule)
            .map_err(|e| RelayError::InvalidSubject(e.to_string()))?;
        self.persist(rules)?;
        Ok(())
    }

    /// Remove rules matching `priority` and `subject_pattern`. Returns how
    /// many were removed.
    pub fn remove_rule(&self, priority: i32, subject_pattern: &str) -> Result<usize, RelayError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let (rules, removed) = self.snapshot.load().without_rule(priority, subject_pattern);
        if removed > 0 {
            self.persist(rules)?;
        }
        Ok(removed)
    }

    fn persist(&self, rules: AccessRuleSet) -> Result<(), StorageError> {
        let file = RulesFile {
            rules: rules.rules().to_vec(),
        };
        write_json_atomic(&self.path, &file)?;
        self.snapshot.store(rules);
        Ok(())
    }
}

fn parse(path: &Path) -> Result<AccessRuleSet, ConfigError> {
    let file = read_json::<RulesFile>(path)?.unwrap_or_default();
    AccessRuleSet::new(file.rules).map_err(|e| ConfigError::Invalid(format!("access rule: {e}")))
}

impl AccessPolicy for AccessControl {
    fn check(&self, subject: &str, sender: &str) -> AccessDecision {
        self.snapshot.load().evaluate(subject, sender)
    }
}

impl HotReload for AccessControl {
    fn watched_path(&self) -> &Path {
        &self.path
    }

    fn reload_from_disk(&self) -> Result<(), ConfigError> {
        self.reload().map(|_| ())
    }
}
