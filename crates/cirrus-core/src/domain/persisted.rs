//! Persisted (quarantined) messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::base64_bytes;

/// Stored form of a persisted message, one blob per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMessageData {
    pub queue_name: String,
    pub insertion_time: DateTime<Utc>,
    pub persistence_time: DateTime<Utc>,
    pub dequeue_count: u32,
    pub reason: String,

    /// Message payload, already unwrapped from envelope and overflow.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Inspection view of a persisted message.
///
/// `is_data_available` and `data_view` are reported separately: a payload the
/// serializer cannot decode is still restorable as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedMessage {
    pub queue_name: String,
    pub store_name: String,
    pub key: String,
    pub insertion_time: DateTime<Utc>,
    pub persistence_time: DateTime<Utc>,
    pub dequeue_count: u32,
    pub reason: String,
    pub is_data_available: bool,

    /// Structured projection of the payload, when it decodes.
    pub data_view: Option<serde_json::Value>,
}
