//! Access rule types.

use serde::{Deserialize, Serialize};

/// Outcome applied when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessEffect {
    Allow,
    Deny,
}

/// A single allow/deny rule.
///
/// Both `subject_pattern` and `sender_scope` use subject wildcard syntax
/// (`*` for one token, trailing `>` for the rest). A `sender_scope` of `>`
/// matches every sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    /// Higher priority rules are evaluated first.
    pub priority: i32,
    pub subject_pattern: String,
    pub sender_scope: String,
    pub effect: AccessEffect,
}

/// Result of evaluating the rule set for one `(subject, sender)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}
