//! Message envelope and propagation budget.
//!
//! An `Envelope` is built exactly once per publish call and is never mutated
//! afterwards. The same envelope is written to every endpoint mailbox the
//! publish fans out to.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default maximum number of hops a message may take.
pub const DEFAULT_MAX_HOPS: u32 = 5;

/// Default time-to-live for a message (one hour).
pub const DEFAULT_TTL_MS: u64 = 3_600_000;

/// Hop-count and time-to-live limits carried on every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    /// Hops already taken by the conversation this message belongs to.
    #[serde(default)]
    pub hop_count: u32,
    /// Maximum hops allowed before delivery is refused.
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
    /// Lifetime in milliseconds, measured from the envelope's `created_at`.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    /// Senders that already handled this conversation, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ancestor_chain: Vec<String>,
}

fn default_max_hops() -> u32 {
    DEFAULT_MAX_HOPS
}

fn default_ttl_ms() -> u64 {
    DEFAULT_TTL_MS
}

impl Budget {
    /// Fresh budget with the given limits and no hops taken.
    pub fn new(max_hops: u32, ttl_ms: u64) -> Self {
        Self {
            hop_count: 0,
            max_hops,
            ttl_ms,
            ancestor_chain: Vec::new(),
        }
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HOPS, DEFAULT_TTL_MS)
    }
}

/// The immutable wrapper around a published payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// UUIDv7 message ID (monotonic, lexicographically sortable).
    pub id: Uuid,
    /// Concrete subject the message was published to.
    pub subject: String,
    /// Sender subject.
    pub from: String,
    /// Subject the recipient should answer on, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Opaque payload bytes (base64 on disk).
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
    pub budget: Budget,
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    /// Build a new envelope stamped with a fresh ID and the current time.
    pub fn new(
        subject: impl Into<String>,
        from: impl Into<String>,
        payload: Vec<u8>,
        budget: Budget,
        reply_to: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            subject: subject.into(),
            from: from.into(),
            reply_to,
            payload,
            budget,
            created_at: Utc::now(),
        }
    }

    /// Absolute instant after which the message is expired.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.budget.ttl_ms).unwrap_or(i64::MAX);
        self.created_at
            .checked_add_signed(Duration::milliseconds(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Budget to attach when a recipient re-publishes as part of the same
    /// conversation: one more hop, this sender appended to the ancestor
    /// chain, and only the remaining lifetime.
    pub fn forward_budget(&self, now: DateTime<Utc>) -> Budget {
        let remaining = (self.expires_at() - now).num_milliseconds().max(0) as u64;
        let mut ancestor_chain = self.budget.ancestor_chain.clone();
        ancestor_chain.push(self.from.clone());
        Budget {
            hop_count: self.budget.hop_count.saturating_add(1),
            max_hops: self.budget.max_hops,
            ttl_ms: remaining,
            ancestor_chain,
        }
    }

    /// Payload interpreted as UTF-8, if valid.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

mod payload_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
