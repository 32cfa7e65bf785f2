//! Ephemeral signal types.
//!
//! Signals are transient notifications (typing, presence, receipts,
//! backpressure warnings). They are never written to disk or the index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of ephemeral signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Typing,
    Presence,
    ReadReceipt,
    DeliveryReceipt,
    Progress,
    Backpressure,
}

/// A transient notification about an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub endpoint_subject: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Signal {
    pub fn new(signal_type: SignalType, endpoint_subject: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            signal_type,
            endpoint_subject: endpoint_subject.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// Mailbox pressure warning for an endpoint.
    pub fn backpressure(endpoint_subject: impl Into<String>, pressure: f64, current_size: u64, max_size: u64) -> Self {
        Self::new(
            SignalType::Backpressure,
            endpoint_subject,
            serde_json::json!({
                "pressure": pressure,
                "currentSize": current_size,
                "maxMailboxSize": max_size,
            }),
        )
    }
}
