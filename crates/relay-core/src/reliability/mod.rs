//! Reliability layer: per-sender rate limiting, per-endpoint circuit
//! breakers, and mailbox backpressure.
//!
//! - `rate_limit` -- pure sliding-window check over an index-derived count
//! - `circuit_breaker` -- in-memory CLOSED/OPEN/HALF_OPEN machine per endpoint
//! - `backpressure` -- pure mailbox-depth check with a 0..=1 pressure ratio

pub mod backpressure;
pub mod circuit_breaker;
pub mod rate_limit;

use std::sync::Arc;

use relay_types::config::ReliabilityConfig;

pub use backpressure::BackpressureDecision;
pub use circuit_breaker::{BreakerDecision, BreakerSnapshot, CircuitBreakerManager, CircuitState};
pub use rate_limit::RateLimitDecision;

/// Source of the current reliability configuration snapshot.
///
/// The hot-reloading config store implements this; each publish reads one
/// snapshot and uses it for every check in that call.
pub trait ReliabilitySource: Send + Sync {
    fn reliability(&self) -> Arc<ReliabilityConfig>;
}

impl ReliabilitySource for Arc<ReliabilityConfig> {
    fn reliability(&self) -> Arc<ReliabilityConfig> {
        Arc::clone(self)
    }
}
