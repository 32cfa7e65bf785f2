//! Mailbox backpressure.
//!
//! `pressure = min(current / max, 1.0)`. Delivery is refused once the
//! endpoint's unprocessed (`new`) count reaches `max_mailbox_size`. Whether a
//! warning signal should go out is reported separately from allow/deny so
//! senders can slow down before they hit the hard limit.

use relay_types::config::BackpressureConfig;

/// Outcome of a backpressure check.
#[derive(Debug, Clone, PartialEq)]
pub struct BackpressureDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub current_size: u64,
    pub pressure: f64,
}

impl BackpressureDecision {
    /// Pressure has reached the configured warning ratio.
    pub fn should_warn(&self, config: &BackpressureConfig) -> bool {
        self.pressure >= config.pressure_warning_at
    }
}

/// Compute pressure and decide for an endpoint holding `current_size`
/// unprocessed messages.
pub fn check(current_size: u64, config: &BackpressureConfig) -> BackpressureDecision {
    let max = config.max_mailbox_size;
    let pressure = if max == 0 {
        1.0
    } else {
        (current_size as f64 / max as f64).min(1.0)
    };

    if current_size >= max {
        return BackpressureDecision {
            allowed: false,
            reason: Some(format!("mailbox full: {current_size} unprocessed (max {max})")),
            current_size,
            pressure,
        };
    }

    BackpressureDecision {
        allowed: true,
        reason: None,
        current_size,
        pressure,
    }
}
