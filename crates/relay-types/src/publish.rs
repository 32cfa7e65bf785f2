//! Publish options and the aggregated publish result.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::Budget;

/// Caller-supplied options for a publish call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Sender subject.
    pub from: String,
    /// Budget to carry; a fresh default budget when `None`.
    pub budget: Option<Budget>,
    pub reply_to: Option<String>,
}

impl PublishOptions {
    pub fn from_sender(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Self::default()
        }
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Why a delivery was refused by policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    RateLimited,
    CircuitOpen,
    Backpressure,
    BudgetExceeded,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::RateLimited => "rate_limited",
            RejectionReason::CircuitOpen => "circuit_open",
            RejectionReason::Backpressure => "backpressure",
            RejectionReason::BudgetExceeded => "budget_exceeded",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single policy rejection.
///
/// `endpoint_hash` is absent for rate-limit rejections, which apply to the
/// publish call as a whole rather than to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_hash: Option<String>,
    pub reason: RejectionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregated outcome of one publish call.
///
/// `rejected` and `mailbox_pressure` are omitted from the serialized form
/// when empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    /// ID of the envelope built for this call; absent when the call was
    /// rate limited before an envelope existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    /// Number of endpoints the message was delivered to.
    pub delivered_to: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<Rejection>,
    /// Endpoint hash -> mailbox pressure (0..=1).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mailbox_pressure: BTreeMap<String, f64>,
}

impl PublishResult {
    pub fn for_message(message_id: Uuid) -> Self {
        Self {
            message_id: Some(message_id),
            ..Self::default()
        }
    }

    /// Result for a call refused by the sender's rate limit.
    pub fn rate_limited(detail: Option<String>) -> Self {
        Self {
            rejected: vec![Rejection {
                endpoint_hash: None,
                reason: RejectionReason::RateLimited,
                detail,
            }],
            ..Self::default()
        }
    }

    /// Whether any rejection carries the given reason.
    pub fn has_rejection(&self, reason: RejectionReason) -> bool {
        self.rejected.iter().any(|r| r.reason == reason)
    }
}
