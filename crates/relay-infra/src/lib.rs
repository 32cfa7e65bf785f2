//! Infrastructure layer for the relay.
//!
//! Implements the storage ports defined in `relay-core`: Maildir mailboxes,
//! the SQLite message index and dead letter queue, file-backed endpoint and
//! access-rule registries, and the hot-reloaded reliability config. `relay`
//! assembles them into a ready-to-use relay rooted at a data directory.

pub mod config;
pub mod maildir;
pub mod reconcile;
pub mod registry;
pub mod relay;
pub mod snapshot;
pub mod sqlite;
pub mod watch;

pub use relay::{LocalRelay, OpenError, RelayBuilder, RelayHandle, default_data_dir, open_relay};
