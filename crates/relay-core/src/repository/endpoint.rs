//! Endpoint directory port.
//!
//! Maps subscriber subjects to their stable hashes. Lookups are synchronous
//! reads of an in-memory snapshot; registration persists the change.

use relay_types::endpoint::Endpoint;
use relay_types::error::StorageError;

use crate::subject;

pub trait EndpointDirectory: Send + Sync {
    /// All registered endpoints, ordered by subject.
    fn endpoints(&self) -> Vec<Endpoint>;

    /// Endpoint registered under exactly `subject`.
    fn get(&self, subject: &str) -> Option<Endpoint>;

    fn by_hash(&self, hash: &str) -> Option<Endpoint>;

    /// Register `subject`, returning the existing endpoint if already present.
    fn register(&self, subject: &str) -> Result<Endpoint, StorageError>;

    /// Remove `subject`. Returns the removed endpoint, if any.
    fn unregister(&self, subject: &str) -> Result<Option<Endpoint>, StorageError>;

    /// Fan-out set for a concrete published subject: every endpoint whose
    /// registered pattern matches it.
    fn resolve(&self, published: &str) -> Vec<Endpoint> {
        self.endpoints()
            .into_iter()
            .filter(|ep| subject::matches(&ep.subject, published))
            .collect()
    }
}
