//! Per-sender sliding-window rate limit.
//!
//! The caller supplies how many messages the sender already has in the index
//! within the trailing window; this module only decides. The check runs once
//! per publish call, before fan-out, so one send to N endpoints costs one
//! unit of quota.

use relay_types::config::RateLimitConfig;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub current_count: u64,
    pub limit: u64,
}

/// Resolve the limit for `sender`: the longest matching override prefix,
/// falling back to the global `max_per_window`.
pub fn resolve_limit(sender: &str, config: &RateLimitConfig) -> u64 {
    config
        .per_sender_overrides
        .iter()
        .filter(|(prefix, _)| sender.starts_with(prefix.as_str()))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, limit)| *limit)
        .unwrap_or(config.max_per_window)
}

/// Decide whether `sender` may publish given `count_in_window` prior messages.
pub fn check(sender: &str, count_in_window: u64, config: &RateLimitConfig) -> RateLimitDecision {
    let limit = resolve_limit(sender, config);

    if count_in_window >= limit {
        return RateLimitDecision {
            allowed: false,
            reason: Some(format!(
                "rate limit exceeded for '{sender}': {count_in_window} messages in {}s (limit {limit})",
                config.window_secs
            )),
            current_count: count_in_window,
            limit,
        };
    }

    RateLimitDecision {
        allowed: true,
        reason: None,
        current_count: count_in_window,
        limit,
    }
}
