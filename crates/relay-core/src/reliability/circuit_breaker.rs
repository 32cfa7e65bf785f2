//! Per-endpoint circuit breakers.
//!
//! Each endpoint hash gets an independent three-state machine:
//! - **Closed** (initial): deliveries allowed; consecutive failures are
//!   counted and any success resets the count. Reaching `failure_threshold`
//!   opens the circuit.
//! - **Open**: deliveries rejected. Once `cooldown_ms` has elapsed the next
//!   check moves to HalfOpen and is itself admitted as a probe. There is no
//!   timer; the transition happens lazily on check.
//! - **HalfOpen**: at most `half_open_probe_count` probes in flight. Each
//!   success counts toward `success_to_close`; any failure reopens.
//!
//! State lives only in this process. A restart starts every endpoint Closed.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use relay_types::config::CircuitBreakerConfig;
use serde::Serialize;
use tracing::{info, warn};

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Internal machine state with the data each state needs.
#[derive(Debug, Clone)]
enum BreakerState {
    Closed {
        consecutive_failures: u32,
    },
    Open {
        opened_at: Instant,
    },
    HalfOpen {
        successes: u32,
        probes_in_flight: u32,
    },
}

impl Default for BreakerState {
    fn default() -> Self {
        BreakerState::Closed {
            consecutive_failures: 0,
        }
    }
}

/// Outcome of a breaker check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub state: CircuitState,
}

/// Point-in-time view of one endpoint's breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    /// Time spent open so far, when open.
    #[serde(skip)]
    pub open_for: Option<Duration>,
}

/// Owns every endpoint's breaker. All mutation goes through its methods.
#[derive(Default)]
pub struct CircuitBreakerManager {
    breakers: DashMap<String, BreakerState>,
}

impl CircuitBreakerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a delivery to `endpoint_hash` may be attempted now.
    pub fn check(&self, endpoint_hash: &str, config: &CircuitBreakerConfig) -> BreakerDecision {
        self.check_at(endpoint_hash, config, Instant::now())
    }

    /// `check` with an explicit clock reading.
    pub fn check_at(
        &self,
        endpoint_hash: &str,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> BreakerDecision {
        let mut entry = self.breakers.entry(endpoint_hash.to_string()).or_default();
        let state = entry.value_mut();

        match state {
            BreakerState::Closed { .. } => BreakerDecision {
                allowed: true,
                reason: None,
                state: CircuitState::Closed,
            },
            BreakerState::Open { opened_at } => {
                let cooldown = Duration::from_millis(config.cooldown_ms);
                let elapsed = now.saturating_duration_since(*opened_at);
                if elapsed >= cooldown {
                    *state = BreakerState::HalfOpen {
                        successes: 0,
                        probes_in_flight: 1,
                    };
                    info!(endpoint_hash, "circuit half-open, admitting probe");
                    BreakerDecision {
                        allowed: true,
                        reason: None,
                        state: CircuitState::HalfOpen,
                    }
                } else {
                    BreakerDecision {
                        allowed: false,
                        reason: Some(format!(
                            "circuit open for {}ms (cooldown {}ms)",
                            elapsed.as_millis(),
                            config.cooldown_ms
                        )),
                        state: CircuitState::Open,
                    }
                }
            }
            BreakerState::HalfOpen {
                probes_in_flight, ..
            } => {
                if *probes_in_flight < config.half_open_probe_count {
                    *probes_in_flight += 1;
                    BreakerDecision {
                        allowed: true,
                        reason: None,
                        state: CircuitState::HalfOpen,
                    }
                } else {
                    BreakerDecision {
                        allowed: false,
                        reason: Some(format!(
                            "circuit half-open with {} probe(s) in flight",
                            probes_in_flight
                        )),
                        state: CircuitState::HalfOpen,
                    }
                }
            }
        }
    }

    /// Record a successful delivery.
    pub fn record_success(&self, endpoint_hash: &str, config: &CircuitBreakerConfig) {
        let mut entry = self.breakers.entry(endpoint_hash.to_string()).or_default();
        let state = entry.value_mut();

        match state {
            BreakerState::Closed {
                consecutive_failures,
            } => *consecutive_failures = 0,
            BreakerState::HalfOpen {
                successes,
                probes_in_flight,
            } => {
                *probes_in_flight = probes_in_flight.saturating_sub(1);
                *successes += 1;
                if *successes >= config.success_to_close {
                    *state = BreakerState::default();
                    info!(endpoint_hash, "circuit closed after successful probes");
                }
            }
            // Deliveries are never attempted while open.
            BreakerState::Open { .. } => {}
        }
    }

    /// Record a failed delivery.
    pub fn record_failure(&self, endpoint_hash: &str, config: &CircuitBreakerConfig) {
        self.record_failure_at(endpoint_hash, config, Instant::now());
    }

    /// `record_failure` with an explicit clock reading.
    pub fn record_failure_at(
        &self,
        endpoint_hash: &str,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) {
        let mut entry = self.breakers.entry(endpoint_hash.to_string()).or_default();
        let state = entry.value_mut();

        match state {
            BreakerState::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= config.failure_threshold {
                    warn!(
                        endpoint_hash,
                        failures = *consecutive_failures,
                        "circuit opened"
                    );
                    *state = BreakerState::Open { opened_at: now };
                }
            }
            BreakerState::HalfOpen { .. } => {
                warn!(endpoint_hash, "probe failed, circuit reopened");
                *state = BreakerState::Open { opened_at: now };
            }
            BreakerState::Open { .. } => {}
        }
    }

    /// Give back a half-open probe slot that was admitted but never used
    /// (the delivery was refused later in the pipeline).
    pub fn release_probe(&self, endpoint_hash: &str) {
        if let Some(mut entry) = self.breakers.get_mut(endpoint_hash) {
            if let BreakerState::HalfOpen {
                probes_in_flight, ..
            } = entry.value_mut()
            {
                *probes_in_flight = probes_in_flight.saturating_sub(1);
            }
        }
    }

    /// Current view of an endpoint's breaker (Closed if never seen).
    pub fn snapshot(&self, endpoint_hash: &str) -> BreakerSnapshot {
        let state = self
            .breakers
            .get(endpoint_hash)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        match state {
            BreakerState::Closed {
                consecutive_failures,
            } => BreakerSnapshot {
                state: CircuitState::Closed,
                consecutive_failures,
                half_open_successes: 0,
                open_for: None,
            },
            BreakerState::Open { opened_at } => BreakerSnapshot {
                state: CircuitState::Open,
                consecutive_failures: 0,
                half_open_successes: 0,
                open_for: Some(opened_at.elapsed()),
            },
            BreakerState::HalfOpen { successes, .. } => BreakerSnapshot {
                state: CircuitState::HalfOpen,
                consecutive_failures: 0,
                half_open_successes: successes,
                open_for: None,
            },
        }
    }

    /// Forget an endpoint's breaker. Returns `true` if one was tracked.
    pub fn reset(&self, endpoint_hash: &str) -> bool {
        self.breakers.remove(endpoint_hash).is_some()
    }

    /// Number of endpoints with tracked state.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl std::fmt::Debug for CircuitBreakerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerManager")
            .field("tracked_endpoints", &self.breakers.len())
            .finish()
    }
}
