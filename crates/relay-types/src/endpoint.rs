//! Endpoint domain type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered subscriber subject and its opaque storage key.
///
/// The `hash` is derived from the subject alone, so the same subject always
/// maps to the same mailbox across restarts. Subjects never appear in file
/// paths or index keys; only the hash does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Subject (or wildcard pattern) the endpoint receives.
    pub subject: String,
    /// Content-derived opaque identifier of `subject`.
    pub hash: String,
    pub registered_at: DateTime<Utc>,
}
