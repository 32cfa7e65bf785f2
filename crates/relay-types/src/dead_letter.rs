//! Dead letter entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;

/// A message whose delivery failed after an actual attempt was made
/// (storage write error or handler error).
///
/// Policy rejections (rate limit, open circuit, backpressure, budget) are
/// reported to the publisher instead and never produce an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub original_envelope: Envelope,
    pub endpoint_hash: String,
    /// Human-readable failure description.
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(envelope: &Envelope, endpoint_hash: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            original_envelope: envelope.clone(),
            endpoint_hash: endpoint_hash.into(),
            reason: reason.into(),
            rejected_at: Utc::now(),
        }
    }
}
