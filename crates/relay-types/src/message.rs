//! Index records for stored messages.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::Envelope;

/// Which Maildir directory a stored message currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Delivered, not yet consumed.
    New,
    /// Consumed by a reader or handler.
    Cur,
    /// Delivery failed after the message was stored.
    Failed,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 3] = [MessageStatus::New, MessageStatus::Cur, MessageStatus::Failed];

    /// Status string, which is also the Maildir directory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::New => "new",
            MessageStatus::Cur => "cur",
            MessageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(MessageStatus::New),
            "cur" => Ok(MessageStatus::Cur),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("invalid message status: '{other}'")),
        }
    }
}

/// One index row: a message stored in one endpoint's mailbox.
///
/// A message fanned out to N endpoints has N records sharing the same `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: Uuid,
    pub subject: String,
    pub sender: String,
    pub endpoint_hash: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    /// Absolute expiry (`created_at + budget.ttl_ms`).
    pub expires_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Index row for `envelope` stored in `endpoint_hash`'s mailbox.
    pub fn for_envelope(envelope: &Envelope, endpoint_hash: &str, status: MessageStatus) -> Self {
        Self {
            id: envelope.id,
            subject: envelope.subject.clone(),
            sender: envelope.from.clone(),
            endpoint_hash: endpoint_hash.to_string(),
            status,
            created_at: envelope.created_at,
            expires_at: envelope.expires_at(),
        }
    }
}

/// Row counts by status across all endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetrics {
    pub new: u64,
    pub cur: u64,
    pub failed: u64,
}

impl IndexMetrics {
    pub fn total(&self) -> u64 {
        self.new + self.cur + self.failed
    }
}
