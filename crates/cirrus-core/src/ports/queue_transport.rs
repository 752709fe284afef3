//! QueueTransport port: the platform's raw queue primitive.
//!
//! At-least-once delivery, size-limited messages, no content addressing.
//! Implementations must report a missing queue as
//! `TransportError::QueueNotFound`, distinct from every other failure.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::TransportError;

/// Largest message the transport accepts, measured after its base64 encoding.
pub const MAX_ENCODED_MESSAGE_SIZE: usize = 64 * 1024;

/// Size of the base64 encoding of `raw_len` bytes.
pub fn encoded_len(raw_len: usize) -> usize {
    raw_len.div_ceil(3) * 4
}

/// Delivery handle of one raw queue item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub message_id: String,

    /// Changes on every delivery; deleting with a stale receipt fails.
    pub pop_receipt: String,
}

/// One delivered raw queue item.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub handle: MessageHandle,
    pub data: Vec<u8>,
    pub insertion_time: DateTime<Utc>,

    /// Number of times the platform delivered this item, this one included.
    pub dequeue_count: u32,
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Returns `true` when the queue was created by this call.
    async fn create(&self, queue: &str) -> Result<bool, TransportError>;

    /// Returns `true` when the queue existed.
    async fn delete_queue(&self, queue: &str) -> Result<bool, TransportError>;

    async fn list_queues(&self, prefix: &str) -> Result<Vec<String>, TransportError>;

    async fn add(&self, queue: &str, data: &[u8]) -> Result<(), TransportError>;

    /// Fetch up to `count` visible items and hide them for `visibility`.
    async fn get_messages(
        &self,
        queue: &str,
        count: usize,
        visibility: Duration,
    ) -> Result<Vec<RawMessage>, TransportError>;

    async fn delete(&self, queue: &str, handle: &MessageHandle) -> Result<(), TransportError>;

    /// Oldest visible item, left in place.
    async fn peek_first(&self, queue: &str) -> Result<Option<RawMessage>, TransportError>;

    async fn approximate_count(&self, queue: &str) -> Result<usize, TransportError>;

    async fn clear(&self, queue: &str) -> Result<(), TransportError>;
}
