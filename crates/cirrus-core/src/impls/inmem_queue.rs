//! In-memory queue transport for development and tests.
//!
//! Mirrors the platform semantics the queue provider relies on:
//! - fetched items stay in the queue, invisible until their timeout runs out
//! - every delivery bumps the dequeue count and issues a new pop receipt
//! - deleting with a stale receipt fails
//! - messages whose base64 encoding exceeds 64 KiB are rejected

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use ulid::Ulid;

use crate::domain::TransportError;
use crate::ports::{
    Clock, MAX_ENCODED_MESSAGE_SIZE, MessageHandle, QueueTransport, RawMessage, SystemClock,
    encoded_len,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    data: Vec<u8>,
    insertion_time: DateTime<Utc>,
    dequeue_count: u32,
    pop_receipt: Option<String>,
    visible_at: Instant,
}

impl StoredMessage {
    fn to_raw(&self) -> RawMessage {
        RawMessage {
            handle: MessageHandle {
                message_id: self.id.clone(),
                pop_receipt: self.pop_receipt.clone().unwrap_or_default(),
            },
            data: self.data.clone(),
            insertion_time: self.insertion_time,
            dequeue_count: self.dequeue_count,
        }
    }
}

#[derive(Default)]
struct State {
    queues: BTreeMap<String, Vec<StoredMessage>>,
    faults: VecDeque<TransportError>,
}

impl State {
    fn take_fault(&mut self) -> Result<(), TransportError> {
        match self.faults.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn queue_mut(&mut self, queue: &str) -> Result<&mut Vec<StoredMessage>, TransportError> {
        self.queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))
    }
}

pub struct InMemoryQueueTransport {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueueTransport {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Insertion times are taken from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    /// The next operation fails with `err`. Faults are consumed in order.
    pub fn inject_fault(&self, err: TransportError) {
        self.lock().faults.push_back(err);
    }

    /// Total number of items in `queue`, visible or not.
    pub fn len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, Vec::len)
    }

    /// Raw bytes of every item in `queue`, in insertion order.
    pub fn raw_items(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|items| items.iter().map(|m| m.data.clone()).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryQueueTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueueTransport {
    async fn create(&self, queue: &str) -> Result<bool, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        if state.queues.contains_key(queue) {
            return Ok(false);
        }
        state.queues.insert(queue.to_string(), Vec::new());
        Ok(true)
    }

    async fn delete_queue(&self, queue: &str) -> Result<bool, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        Ok(state.queues.remove(queue).is_some())
    }

    async fn list_queues(&self, prefix: &str) -> Result<Vec<String>, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        Ok(state
            .queues
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn add(&self, queue: &str, data: &[u8]) -> Result<(), TransportError> {
        tokio::task::yield_now().await;
        let insertion_time = self.clock.now();
        let mut state = self.lock();
        state.take_fault()?;
        let items = state.queue_mut(queue)?;
        if encoded_len(data.len()) > MAX_ENCODED_MESSAGE_SIZE {
            return Err(TransportError::MessageRejected(format!(
                "{} bytes exceed the {MAX_ENCODED_MESSAGE_SIZE} bytes limit once encoded",
                data.len()
            )));
        }
        items.push(StoredMessage {
            id: Ulid::new().to_string(),
            data: data.to_vec(),
            insertion_time,
            dequeue_count: 0,
            pop_receipt: None,
            visible_at: Instant::now(),
        });
        Ok(())
    }

    async fn get_messages(
        &self,
        queue: &str,
        count: usize,
        visibility: Duration,
    ) -> Result<Vec<RawMessage>, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        let items = state.queue_mut(queue)?;
        let now = Instant::now();
        let delivered = items
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(count)
            .map(|m| {
                m.dequeue_count += 1;
                m.pop_receipt = Some(Ulid::new().to_string());
                m.visible_at = now + visibility;
                m.to_raw()
            })
            .collect();
        Ok(delivered)
    }

    async fn delete(&self, queue: &str, handle: &MessageHandle) -> Result<(), TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        let items = state.queue_mut(queue)?;
        let index = items
            .iter()
            .position(|m| m.id == handle.message_id)
            .ok_or_else(|| TransportError::MessageNotFound(queue.to_string()))?;
        if items[index].pop_receipt.as_deref() != Some(handle.pop_receipt.as_str()) {
            return Err(TransportError::PopReceiptMismatch(queue.to_string()));
        }
        items.remove(index);
        Ok(())
    }

    async fn peek_first(&self, queue: &str) -> Result<Option<RawMessage>, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        let items = state.queue_mut(queue)?;
        let now = Instant::now();
        Ok(items
            .iter()
            .find(|m| m.visible_at <= now)
            .map(StoredMessage::to_raw))
    }

    async fn approximate_count(&self, queue: &str) -> Result<usize, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        Ok(state.queue_mut(queue)?.len())
    }

    async fn clear(&self, queue: &str) -> Result<(), TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        state.queue_mut(queue)?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VISIBILITY: Duration = Duration::from_secs(30);

    async fn transport_with_queue() -> InMemoryQueueTransport {
        let transport = InMemoryQueueTransport::new();
        transport.create("q").await.unwrap();
        transport
    }

    #[tokio::test]
    async fn missing_queue_is_reported_distinctly() {
        let transport = InMemoryQueueTransport::new();
        let err = transport.get_messages("q", 1, VISIBILITY).await.unwrap_err();
        assert_eq!(err, TransportError::QueueNotFound("q".into()));
        assert!(transport.create("q").await.unwrap());
        assert!(!transport.create("q").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn fetched_items_reappear_after_visibility_timeout() {
        let transport = transport_with_queue().await;
        transport.add("q", b"a").await.unwrap();

        let first = transport.get_messages("q", 10, VISIBILITY).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].dequeue_count, 1);
        assert!(transport.get_messages("q", 10, VISIBILITY).await.unwrap().is_empty());

        tokio::time::advance(VISIBILITY).await;
        let second = transport.get_messages("q", 10, VISIBILITY).await.unwrap();
        assert_eq!(second[0].dequeue_count, 2);
        assert_ne!(first[0].handle.pop_receipt, second[0].handle.pop_receipt);

        // The first receipt is stale now.
        assert_eq!(
            transport.delete("q", &first[0].handle).await.unwrap_err(),
            TransportError::PopReceiptMismatch("q".into())
        );
        transport.delete("q", &second[0].handle).await.unwrap();
        assert_eq!(
            transport.delete("q", &second[0].handle).await.unwrap_err(),
            TransportError::MessageNotFound("q".into())
        );
    }

    #[tokio::test]
    async fn oversized_messages_are_rejected() {
        let transport = transport_with_queue().await;
        transport.add("q", &vec![0u8; 49_152]).await.unwrap();
        let err = transport.add("q", &vec![0u8; 49_153]).await.unwrap_err();
        assert!(matches!(err, TransportError::MessageRejected(_)));
        assert_eq!(transport.len("q"), 1);
    }

    #[tokio::test]
    async fn peek_and_clear() {
        let transport = transport_with_queue().await;
        transport.add("q", b"a").await.unwrap();
        transport.add("q", b"b").await.unwrap();
        let first = transport.peek_first("q").await.unwrap().unwrap();
        assert_eq!(first.data, b"a");
        assert_eq!(transport.approximate_count("q").await.unwrap(), 2);

        transport.clear("q").await.unwrap();
        assert_eq!(transport.approximate_count("q").await.unwrap(), 0);
        assert!(transport.peek_first("q").await.unwrap().is_none());
    }
}
