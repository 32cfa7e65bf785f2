//! Reliability configuration for the relay.
//!
//! Mirrors the `reliability` object of `config.json`. Every field is optional
//! on disk and falls back to the defaults below, so an empty document (or a
//! missing file) yields a fully usable configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level shape of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub reliability: ReliabilityConfig,
}

/// Thresholds for the three reliability checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReliabilityConfig {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub backpressure: BackpressureConfig,
}

impl ReliabilityConfig {
    /// Reject values the checks cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid("rateLimit.windowSecs must be > 0".into()));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuitBreaker.failureThreshold must be > 0".into(),
            ));
        }
        if self.circuit_breaker.half_open_probe_count == 0 {
            return Err(ConfigError::Invalid(
                "circuitBreaker.halfOpenProbeCount must be > 0".into(),
            ));
        }
        if self.circuit_breaker.success_to_close == 0 {
            return Err(ConfigError::Invalid(
                "circuitBreaker.successToClose must be > 0".into(),
            ));
        }
        if self.backpressure.max_mailbox_size == 0 {
            return Err(ConfigError::Invalid(
                "backpressure.maxMailboxSize must be > 0".into(),
            ));
        }
        let warn_at = self.backpressure.pressure_warning_at;
        if !(0.0..=1.0).contains(&warn_at) {
            return Err(ConfigError::Invalid(format!(
                "backpressure.pressureWarningAt must be within 0..=1 (got {warn_at})"
            )));
        }
        Ok(())
    }
}

/// Per-sender sliding window limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_per_window")]
    pub max_per_window: u64,
    /// Sender subject prefix -> limit. The longest matching prefix wins.
    #[serde(default)]
    pub per_sender_overrides: BTreeMap<String, u64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: default_window_secs(),
            max_per_window: default_max_per_window(),
            per_sender_overrides: BTreeMap::new(),
        }
    }
}

/// Per-endpoint circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_half_open_probe_count")]
    pub half_open_probe_count: u32,
    #[serde(default = "default_success_to_close")]
    pub success_to_close: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            half_open_probe_count: default_half_open_probe_count(),
            success_to_close: default_success_to_close(),
        }
    }
}

/// Mailbox depth limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpressureConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_mailbox_size")]
    pub max_mailbox_size: u64,
    /// Pressure ratio (0..=1) at which a warning signal is emitted.
    #[serde(default = "default_pressure_warning_at")]
    pub pressure_warning_at: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_mailbox_size: default_max_mailbox_size(),
            pressure_warning_at: default_pressure_warning_at(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_per_window() -> u64 {
    100
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_half_open_probe_count() -> u32 {
    1
}

fn default_success_to_close() -> u32 {
    2
}

fn default_max_mailbox_size() -> u64 {
    1000
}

fn default_pressure_warning_at() -> f64 {
    0.8
}
