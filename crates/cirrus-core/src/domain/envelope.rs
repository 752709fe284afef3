//! Queue frames: the envelope and the overflow wrapper.
//!
//! Both are stored in the queue instead of (or around) the user message:
//! - `MessageEnvelope` carries the dequeue count across abandon/requeue.
//! - `MessageWrapper` points at an overflow blob holding an oversized payload.
//!
//! Each frame is a single-key JSON object (`cirrus_envelope` /
//! `cirrus_overflow`) with no unknown fields allowed, so user payloads do not
//! accidentally decode as frames.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const ENVELOPE_TAG: &str = "cirrus_envelope";
const OVERFLOW_TAG: &str = "cirrus_overflow";

/// A requeued message together with its cumulative dequeue count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageEnvelope {
    pub dequeue_count: u32,

    /// Serialized inner message (user payload or wrapper bytes).
    #[serde(with = "base64_bytes")]
    pub raw_message: Vec<u8>,
}

impl MessageEnvelope {
    pub fn to_value(&self) -> Value {
        tagged(ENVELOPE_TAG, self)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        untagged(ENVELOPE_TAG, value)
    }
}

/// Pointer to an overflow blob holding the real payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageWrapper {
    pub container_name: String,
    pub blob_name: String,
}

impl MessageWrapper {
    pub fn to_value(&self) -> Value {
        tagged(OVERFLOW_TAG, self)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        untagged(OVERFLOW_TAG, value)
    }
}

fn tagged<T: Serialize>(tag: &str, inner: &T) -> Value {
    let mut map = Map::new();
    // Plain structs of strings/ints/bytes always serialize.
    map.insert(
        tag.to_string(),
        serde_json::to_value(inner).unwrap_or(Value::Null),
    );
    Value::Object(map)
}

fn untagged<T: for<'de> Deserialize<'de>>(tag: &str, value: &Value) -> Option<T> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    serde_json::from_value(map.get(tag)?.clone()).ok()
}

/// Serde adapter storing bytes as standard base64 text.
pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_is_a_single_key_object() {
        let envelope = MessageEnvelope {
            dequeue_count: 2,
            raw_message: b"hello".to_vec(),
        };
        let v = envelope.to_value();
        assert_eq!(v["cirrus_envelope"]["dequeue_count"], 2);
        assert_eq!(v["cirrus_envelope"]["raw_message"], "aGVsbG8=");
        assert_eq!(MessageEnvelope::from_value(&v), Some(envelope));
    }

    #[test]
    fn user_payloads_are_not_frames() {
        let payload = json!({"dequeue_count": 2, "raw_message": "aGVsbG8="});
        assert!(MessageEnvelope::from_value(&payload).is_none());

        let payload = json!({"cirrus_overflow": {"container_name": "c", "blob_name": "b", "x": 1}});
        assert!(MessageWrapper::from_value(&payload).is_none());

        let payload = json!({"cirrus_overflow": {"container_name": "c", "blob_name": "b"}, "other": 1});
        assert!(MessageWrapper::from_value(&payload).is_none());
    }

    #[test]
    fn wrapper_is_not_an_envelope() {
        let wrapper = MessageWrapper {
            container_name: "overflow".to_string(),
            blob_name: "jobs/01H".to_string(),
        };
        let v = wrapper.to_value();
        assert!(MessageEnvelope::from_value(&v).is_none());
        assert_eq!(MessageWrapper::from_value(&v), Some(wrapper));
    }
}
