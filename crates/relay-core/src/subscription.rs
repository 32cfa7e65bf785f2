//! In-process subscription registry.
//!
//! Binds subject patterns to handlers living in the same process. Every
//! subscription pattern is also a registered endpoint; after a message is
//! stored in that endpoint's mailbox, the relay dispatches it to each handler
//! bound to the endpoint's pattern.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use relay_types::envelope::Envelope;
use thiserror::Error;

/// Failure reported by a message handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Receives messages delivered to a subscribed endpoint.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Envelope) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        self(envelope)
    }
}

/// Run `handler`, turning a panic into a `HandlerError`.
pub(crate) fn invoke(handler: &dyn MessageHandler, envelope: &Envelope) -> Result<(), HandlerError> {
    panic::catch_unwind(AssertUnwindSafe(|| handler.handle(envelope))).unwrap_or_else(|payload| {
        Err(HandlerError::new(format!(
            "handler panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

struct Binding {
    pattern: String,
    handler: Arc<dyn MessageHandler>,
}

/// Pattern -> handler bindings, keyed by a subscription id.
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    bindings: DashMap<u64, Binding>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `pattern`. Returns the subscription id.
    pub fn subscribe(&self, pattern: impl Into<String>, handler: Arc<dyn MessageHandler>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.bindings.insert(
            id,
            Binding {
                pattern: pattern.into(),
                handler,
            },
        );
        id
    }

    /// Remove a binding. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.bindings.remove(&id).is_some()
    }

    /// Remove every binding for `pattern`. Returns how many were removed.
    pub fn unsubscribe_pattern(&self, pattern: &str) -> usize {
        let ids: Vec<u64> = self
            .bindings
            .iter()
            .filter(|entry| entry.value().pattern == pattern)
            .map(|entry| *entry.key())
            .collect();
        ids.iter().filter(|id| self.bindings.remove(id).is_some()).count()
    }

    /// Handlers bound to exactly `pattern`, in subscription order.
    pub fn handlers_for(&self, pattern: &str) -> Vec<Arc<dyn MessageHandler>> {
        let mut hits: Vec<(u64, Arc<dyn MessageHandler>)> = self
            .bindings
            .iter()
            .filter(|entry| entry.value().pattern == pattern)
            .map(|entry| (*entry.key(), Arc::clone(&entry.value().handler)))
            .collect();
        hits.sort_by_key(|(id, _)| *id);
        hits.into_iter().map(|(_, h)| h).collect()
    }

    /// Number of handlers bound to `pattern`.
    pub fn count_for(&self, pattern: &str) -> usize {
        self.bindings
            .iter()
            .filter(|entry| entry.value().pattern == pattern)
            .count()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.bindings.len())
            .finish()
    }
}

/// Returned by `subscribe`; drop it to keep the subscription, call
/// `unsubscribe` to end it.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    registry: Arc<SubscriptionRegistry>,
    id: u64,
    pattern: String,
}

impl SubscriptionHandle {
    pub fn new(registry: Arc<SubscriptionRegistry>, id: u64, pattern: impl Into<String>) -> Self {
        Self {
            registry,
            id,
            pattern: pattern.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Stop receiving messages. The endpoint and its mailbox stay registered.
    pub fn unsubscribe(self) -> bool {
        self.registry.unsubscribe(self.id)
    }
}
