//! Queue storage provider: message lifecycle on top of a `QueueTransport`.
//!
//! Life of a message:
//! - `put` serializes it; payloads too large for the queue go to an overflow
//!   blob and a `MessageWrapper` is queued instead
//! - `get` fetches raw items, unpacks envelopes and wrappers, quarantines
//!   poison messages, and checks the rest out
//! - `delete` / `abandon` / `resume_later` / `persist` end the checkout
//!
//! The checkout table lock is only ever held for in-memory bookkeeping,
//! never across a transport call.

mod checkout;
mod persist;

use std::any::type_name;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use self::checkout::{CheckedIn, CheckoutTable, Delivery, InProcessMessage, MessageKey};
use crate::domain::{
    MessageEnvelope, MessageWrapper, PersistedMessageData, StorageError, TransportError,
};
use crate::ports::{
    Clock, DataSerializer, Finalizer, IdGenerator, MAX_ENCODED_MESSAGE_SIZE, MessageHandle,
    MonitorError, QueueTransport, RawMessage, SystemClock, UlidGenerator, serialize_as,
    try_deserialize_as,
};
use crate::retry::{RetryPolicy, SlowInstantiation, TransientServerError, retry};
use crate::storage::BlobStorageProvider;

/// Container holding payloads too large for the queue.
pub const OVERFLOW_CONTAINER: &str = "cirrus-overflowing-messages";

/// Container holding persisted (quarantined) messages, `"{store}/{key}"`.
pub const PERSISTED_CONTAINER: &str = "cirrus-persisted-messages";

/// Store receiving poison messages detected by `get`.
pub const POISON_STORE: &str = "failing-messages";

/// Largest payload queued as is: base64 turns 3 bytes into 4.
pub const MAX_RAW_MESSAGE_SIZE: usize = MAX_ENCODED_MESSAGE_SIZE / 4 * 3;

/// Payload with any envelope removed.
struct Unpacked {
    payload: Vec<u8>,
    carried_count: u32,
    enveloped: bool,
}

/// Raw item to quarantine once the checkout lock is released.
struct Poisoned {
    message: RawMessage,
    payload: Vec<u8>,
    dequeue_count: u32,
    reason: String,
}

pub struct QueueStorageProvider {
    queues: Arc<dyn QueueTransport>,
    blobs: Arc<BlobStorageProvider>,
    serializer: Arc<dyn DataSerializer>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    checkouts: Mutex<CheckoutTable>,
}

impl QueueStorageProvider {
    pub fn new(
        queues: Arc<dyn QueueTransport>,
        blobs: Arc<BlobStorageProvider>,
        serializer: Arc<dyn DataSerializer>,
    ) -> Self {
        Self {
            queues,
            blobs,
            serializer,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            checkouts: Mutex::new(CheckoutTable::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    fn serializer(&self) -> &dyn DataSerializer {
        self.serializer.as_ref()
    }

    fn checkouts(&self) -> MutexGuard<'_, CheckoutTable> {
        self.checkouts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of raw deliveries currently checked out.
    pub fn checked_out_count(&self) -> usize {
        self.checkouts().delivery_count()
    }

    // ---- get ----

    /// Fetch up to `count` messages, hidden from other consumers for
    /// `visibility_timeout`.
    ///
    /// Messages delivered more than `max_processing_trials` times, and
    /// messages that decode neither as an overflow wrapper nor as `T`, are
    /// moved to the `failing-messages` store instead of being returned.
    ///
    /// Per-message failures (quarantine writes, overflow downloads) are
    /// logged and leave the raw item to reappear after its timeout; only a
    /// failing fetch is an error.
    pub async fn get<T>(
        &self,
        queue: &str,
        count: usize,
        visibility_timeout: Duration,
        max_processing_trials: u32,
    ) -> Result<Vec<T>, StorageError>
    where
        T: Serialize + DeserializeOwned,
    {
        let fetched = retry(&TransientServerError, || async move {
            Ok(self
                .queues
                .get_messages(queue, count, visibility_timeout)
                .await?)
        })
        .await;
        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(err) if err.is_queue_not_found() => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut messages = Vec::with_capacity(fetched.len());
        let mut wrapped = Vec::new();
        let mut poisoned = Vec::new();
        {
            let mut table = self.checkouts();
            for message in fetched {
                let unpacked = unpack(self.serializer(), &message.data);
                let dequeue_count = message.dequeue_count + unpacked.carried_count;
                if dequeue_count > max_processing_trials {
                    poisoned.push(Poisoned {
                        reason: format!(
                            "dequeued {dequeue_count} times, exceeding {max_processing_trials} processing trials"
                        ),
                        message,
                        payload: unpacked.payload,
                        dequeue_count,
                    });
                    continue;
                }

                // The wrapper frame is reserved, so it is recognized before
                // any attempt at `T`: a permissive `T` would accept it too.
                let classified = match parse_wrapper(self.serializer(), &unpacked.payload) {
                    Ok(wrapper) => MessageKey::of(&wrapper.to_value()).map(|key| {
                        wrapped.push((key.clone(), wrapper));
                        (key, true)
                    }),
                    Err(wrapper_err) => {
                        match try_deserialize_as::<T>(self.serializer(), &unpacked.payload) {
                            Ok(value) => MessageKey::of(&value).map(|key| {
                                messages.push(value);
                                (key, false)
                            }),
                            Err(value_err) => {
                                let envelope = if unpacked.enveloped {
                                    "ok"
                                } else {
                                    "not an envelope"
                                };
                                Err(StorageError::Serialization(format!(
                                    "cannot deserialize message: as {}: {value_err}; as overflow wrapper: {wrapper_err}; as envelope: {envelope}",
                                    type_name::<T>()
                                )))
                            }
                        }
                    }
                };
                let (key, is_overflowing) = match classified {
                    Ok(classified) => classified,
                    Err(err) => {
                        poisoned.push(Poisoned {
                            reason: err.to_string(),
                            message,
                            payload: unpacked.payload,
                            dequeue_count,
                        });
                        continue;
                    }
                };

                table.check_out(
                    key,
                    InProcessMessage {
                        queue_name: queue.to_string(),
                        deliveries: vec![Delivery {
                            handle: message.handle,
                            raw: message.data,
                            insertion_time: message.insertion_time,
                        }],
                        data: unpacked.payload,
                        is_overflowing,
                        dequeue_count,
                    },
                );
            }
        }

        // From here on, failures concern single items and never abort the
        // batch: messages already checked out must reach the caller.
        for poison in poisoned {
            let dequeue_count = poison.dequeue_count;
            if let Err(err) = self.quarantine_poisoned(queue, poison).await {
                warn!(queue, dequeue_count, error = %err, "cannot quarantine poison message, it reappears after its visibility timeout");
            }
        }

        for (key, wrapper) in wrapped {
            match self.unwrap_overflow::<T>(queue, &key, &wrapper).await {
                Ok(Some(value)) => messages.push(value),
                Ok(None) => {}
                Err(err) => {
                    // The item becomes visible again once its timeout runs out.
                    self.checkouts().discard(&key);
                    if matches!(err, StorageError::DataCorruption { .. }) {
                        error!(queue, blob = %wrapper.blob_name, error = %err, "overflow blob is corrupted, message left for redelivery");
                    } else {
                        warn!(queue, blob = %wrapper.blob_name, error = %err, "cannot unwrap overflowing message");
                    }
                }
            }
        }

        Ok(messages)
    }

    async fn quarantine_poisoned(&self, queue: &str, poison: Poisoned) -> Result<(), StorageError> {
        info!(queue, dequeue_count = poison.dequeue_count, reason = %poison.reason, "quarantining poison message");
        let delivery = Delivery {
            handle: poison.message.handle,
            raw: poison.message.data,
            insertion_time: poison.message.insertion_time,
        };
        let (data, overflow) = self.resolve_payload(poison.payload).await?;
        self.quarantine(
            queue,
            POISON_STORE,
            &poison.reason,
            &delivery,
            data,
            overflow.as_ref(),
            poison.dequeue_count,
        )
        .await
    }

    /// Fetch the payload of a wrapped checkout and re-key it under the value.
    ///
    /// `Ok(None)` when the message was dropped or quarantined instead. On
    /// error the checkout under `key` is left to the caller.
    async fn unwrap_overflow<T>(
        &self,
        queue: &str,
        key: &MessageKey,
        wrapper: &MessageWrapper,
    ) -> Result<Option<T>, StorageError>
    where
        T: Serialize + DeserializeOwned,
    {
        let fetched = self
            .blobs
            .get_bytes(&wrapper.container_name, &wrapper.blob_name)
            .await?;
        let Some(data) = fetched else {
            warn!(queue, blob = %wrapper.blob_name, "overflow blob is gone, dropping dangling message");
            let record = self.checkouts().discard(key);
            for delivery in record.map(|r| r.deliveries).unwrap_or_default() {
                self.delete_raw(queue, &delivery.handle).await?;
            }
            return Ok(None);
        };

        match try_deserialize_as::<T>(self.serializer(), &data) {
            Ok(value) => {
                let value_key = MessageKey::of(&value)?;
                let still_checked_out = self.checkouts().rekey(key, value_key, data);
                Ok(still_checked_out.then_some(value))
            }
            Err(err) => {
                let record = self.checkouts().discard(key);
                let reason = format!(
                    "cannot deserialize overflowing message as {}: {err}",
                    type_name::<T>()
                );
                info!(queue, reason = %reason, "quarantining poison message");
                if let Some(record) = record {
                    for delivery in &record.deliveries {
                        self.quarantine(
                            queue,
                            POISON_STORE,
                            &reason,
                            delivery,
                            data.clone(),
                            Some(wrapper),
                            record.dequeue_count,
                        )
                        .await?;
                    }
                }
                Ok(None)
            }
        }
    }

    // ---- put ----

    pub async fn put<T: Serialize>(&self, queue: &str, message: &T) -> Result<(), StorageError> {
        self.put_range(queue, std::slice::from_ref(message)).await
    }

    /// Queue messages in order. Missing queues are created.
    pub async fn put_range<T: Serialize>(
        &self,
        queue: &str,
        messages: &[T],
    ) -> Result<(), StorageError> {
        for message in messages {
            let data = serialize_as(self.serializer(), message)?;
            self.enqueue(queue, data).await?;
        }
        Ok(())
    }

    /// Queue serialized bytes, moving them to an overflow blob when they are
    /// too large or the transport refuses to encode them.
    async fn enqueue(&self, queue: &str, data: Vec<u8>) -> Result<(), StorageError> {
        if data.len() >= MAX_RAW_MESSAGE_SIZE {
            let wrapper = self.overflow(queue, &data).await?;
            return self.add_raw(queue, &wrapper).await;
        }
        match self.add_raw(queue, &data).await {
            Err(StorageError::Transport(TransportError::MessageRejected(reason))) => {
                debug!(queue, %reason, "transport rejected message, moving it to overflow");
                let wrapper = self.overflow(queue, &data).await?;
                self.add_raw(queue, &wrapper).await
            }
            outcome => outcome,
        }
    }

    /// Store `data` in a fresh overflow blob; returns the wrapper bytes.
    async fn overflow(&self, queue: &str, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        let wrapper = MessageWrapper {
            container_name: OVERFLOW_CONTAINER.to_string(),
            blob_name: self.ids.generate_overflow_name(queue),
        };
        debug!(queue, blob = %wrapper.blob_name, size = data.len(), "overflowing message");
        self.blobs
            .put_bytes(&wrapper.container_name, &wrapper.blob_name, data, true, None)
            .await?;
        self.serializer().serialize(&wrapper.to_value())
    }

    async fn add_raw(&self, queue: &str, data: &[u8]) -> Result<(), StorageError> {
        let added = self.add_with(&TransientServerError, queue, data).await;
        match added {
            Err(err) if err.is_queue_not_found() => {
                debug!(queue, "creating queue on first put");
                self.create_queue(queue).await?;
                let policy = SlowInstantiation.or(TransientServerError);
                self.add_with(&policy, queue, data).await
            }
            outcome => outcome,
        }
    }

    async fn add_with<P: RetryPolicy>(
        &self,
        policy: &P,
        queue: &str,
        data: &[u8],
    ) -> Result<(), StorageError> {
        retry(policy, || async move { Ok(self.queues.add(queue, data).await?) }).await
    }

    async fn create_queue(&self, queue: &str) -> Result<bool, StorageError> {
        let policy = SlowInstantiation.or(TransientServerError);
        retry(&policy, || async move { Ok(self.queues.create(queue).await?) }).await
    }

    // ---- delete ----

    /// `true` when this call removed the message from the queue.
    ///
    /// Deleting a message that is not checked out (already deleted, never
    /// fetched) is a no-op returning `false`.
    pub async fn delete<T: Serialize + ?Sized>(&self, message: &T) -> Result<bool, StorageError> {
        let key = MessageKey::of(message)?;
        let checked_in = self.checkouts().check_in(&key);
        let Some(checked_in) = checked_in else {
            return Ok(false);
        };

        if checked_in.is_overflowing
            && let Some(wrapper) = self.wrapper_in(&checked_in.delivery.raw)
        {
            self.blobs
                .delete_blob_if_exist(&wrapper.container_name, &wrapper.blob_name)
                .await?;
        }
        self.delete_raw(&checked_in.queue_name, &checked_in.delivery.handle)
            .await
    }

    /// Number of messages this call removed from their queue.
    pub async fn delete_range<T: Serialize>(&self, messages: &[T]) -> Result<usize, StorageError> {
        let mut deleted = 0;
        for message in messages {
            if self.delete(message).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Someone else already deleted or re-fetched the item: `false`.
    async fn delete_raw(&self, queue: &str, handle: &MessageHandle) -> Result<bool, StorageError> {
        let deleted = retry(&TransientServerError, || async move {
            Ok(self.queues.delete(queue, handle).await?)
        })
        .await;
        match deleted {
            Ok(()) => Ok(true),
            Err(StorageError::Transport(
                TransportError::MessageNotFound(_)
                | TransportError::PopReceiptMismatch(_)
                | TransportError::QueueNotFound(_),
            )) => {
                debug!(queue, message_id = %handle.message_id, "message already gone");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    // ---- abandon / resume later ----

    /// Put the message back for another consumer, keeping its dequeue count.
    pub async fn abandon<T: Serialize + ?Sized>(&self, message: &T) -> Result<bool, StorageError> {
        let key = MessageKey::of(message)?;
        let checked_in = self.checkouts().check_in(&key);
        match checked_in {
            Some(checked_in) => self.abandon_checked_in(checked_in).await,
            None => Ok(false),
        }
    }

    pub async fn abandon_range<T: Serialize>(&self, messages: &[T]) -> Result<usize, StorageError> {
        let mut abandoned = 0;
        for message in messages {
            if self.abandon(message).await? {
                abandoned += 1;
            }
        }
        Ok(abandoned)
    }

    /// Abandon every checked-out delivery.
    pub async fn abandon_all(&self) -> Result<usize, StorageError> {
        let keys = self.checkouts().keys();
        let mut abandoned = 0;
        for key in keys {
            loop {
                let checked_in = self.checkouts().check_in(&key);
                let Some(checked_in) = checked_in else {
                    break;
                };
                if self.abandon_checked_in(checked_in).await? {
                    abandoned += 1;
                }
            }
        }
        Ok(abandoned)
    }

    async fn abandon_checked_in(&self, checked_in: CheckedIn) -> Result<bool, StorageError> {
        let queue = checked_in.queue_name.as_str();
        let mut envelope = MessageEnvelope {
            dequeue_count: checked_in.dequeue_count,
            raw_message: checked_in.data.clone(),
        };
        let mut framed = self.serializer().serialize(&envelope.to_value())?;
        if framed.len() >= MAX_RAW_MESSAGE_SIZE {
            envelope.raw_message = self.overflow(queue, &checked_in.data).await?;
            framed = self.serializer().serialize(&envelope.to_value())?;
        }
        self.add_raw(queue, &framed).await?;

        let deleted = self.delete_raw(queue, &checked_in.delivery.handle).await?;
        self.drop_replaced_overflow(&checked_in).await?;
        debug!(queue, dequeue_count = checked_in.dequeue_count, "message abandoned");
        Ok(deleted)
    }

    /// Queue a fresh copy and delete the original. The copy starts over with
    /// a dequeue count of zero.
    pub async fn resume_later<T: Serialize + ?Sized>(
        &self,
        message: &T,
    ) -> Result<bool, StorageError> {
        let key = MessageKey::of(message)?;
        let checked_in = self.checkouts().check_in(&key);
        let Some(checked_in) = checked_in else {
            return Ok(false);
        };

        let queue = checked_in.queue_name.as_str();
        self.enqueue(queue, checked_in.data.clone()).await?;
        let deleted = self.delete_raw(queue, &checked_in.delivery.handle).await?;
        self.drop_replaced_overflow(&checked_in).await?;
        Ok(deleted)
    }

    pub async fn resume_later_range<T: Serialize>(
        &self,
        messages: &[T],
    ) -> Result<usize, StorageError> {
        let mut resumed = 0;
        for message in messages {
            if self.resume_later(message).await? {
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// After requeueing a copy built from the unpacked payload, the overflow
    /// blob of the old item is no longer referenced.
    async fn drop_replaced_overflow(&self, checked_in: &CheckedIn) -> Result<(), StorageError> {
        if !checked_in.is_overflowing {
            return Ok(());
        }
        let Some(old) = self.wrapper_in(&checked_in.delivery.raw) else {
            return Ok(());
        };
        // Not unwrapped yet: the copy still points at the same blob.
        if parse_wrapper(self.serializer(), &checked_in.data).ok().as_ref() == Some(&old) {
            return Ok(());
        }
        self.blobs
            .delete_blob_if_exist(&old.container_name, &old.blob_name)
            .await?;
        Ok(())
    }

    // ---- persist ----

    /// Move a checked-out message into the persisted store `store`.
    pub async fn persist<T: Serialize + ?Sized>(
        &self,
        message: &T,
        store: &str,
        reason: &str,
    ) -> Result<bool, StorageError> {
        let key = MessageKey::of(message)?;
        let checked_in = self.checkouts().check_in(&key);
        let Some(checked_in) = checked_in else {
            return Ok(false);
        };

        let (data, fetched_from) = self.resolve_payload(checked_in.data).await?;
        let overflow = fetched_from.or_else(|| {
            checked_in
                .is_overflowing
                .then(|| self.wrapper_in(&checked_in.delivery.raw))
                .flatten()
        });
        self.quarantine(
            &checked_in.queue_name,
            store,
            reason,
            &checked_in.delivery,
            data,
            overflow.as_ref(),
            checked_in.dequeue_count,
        )
        .await?;
        Ok(true)
    }

    pub async fn persist_range<T: Serialize>(
        &self,
        messages: &[T],
        store: &str,
        reason: &str,
    ) -> Result<usize, StorageError> {
        let mut persisted = 0;
        for message in messages {
            if self.persist(message, store, reason).await? {
                persisted += 1;
            }
        }
        Ok(persisted)
    }

    /// Replace wrapper bytes by the overflow payload they point at. A dangling
    /// wrapper is kept as is.
    async fn resolve_payload(
        &self,
        payload: Vec<u8>,
    ) -> Result<(Vec<u8>, Option<MessageWrapper>), StorageError> {
        let Ok(wrapper) = parse_wrapper(self.serializer(), &payload) else {
            return Ok((payload, None));
        };
        let data = self
            .blobs
            .get_bytes(&wrapper.container_name, &wrapper.blob_name)
            .await?;
        Ok((data.unwrap_or(payload), Some(wrapper)))
    }

    /// Write the persisted record, then drop the overflow blob and the
    /// queue item.
    #[allow(clippy::too_many_arguments)]
    async fn quarantine(
        &self,
        queue: &str,
        store: &str,
        reason: &str,
        delivery: &Delivery,
        data: Vec<u8>,
        overflow: Option<&MessageWrapper>,
        dequeue_count: u32,
    ) -> Result<(), StorageError> {
        let record = PersistedMessageData {
            queue_name: queue.to_string(),
            insertion_time: delivery.insertion_time,
            persistence_time: self.clock.now(),
            dequeue_count,
            reason: reason.to_string(),
            data,
        };
        let name = format!("{store}/{}", self.ids.generate_persisted_key());
        self.blobs
            .put(PERSISTED_CONTAINER, &name, &record, true, None)
            .await?;

        if let Some(wrapper) = overflow {
            self.blobs
                .delete_blob_if_exist(&wrapper.container_name, &wrapper.blob_name)
                .await?;
        }
        self.delete_raw(queue, &delivery.handle).await?;
        Ok(())
    }

    // ---- queue management ----

    /// Abandon everything still checked out, so that in-flight messages
    /// become visible again instead of waiting out their timeout.
    pub async fn dispose(&self) -> Result<usize, StorageError> {
        let abandoned = self.abandon_all().await?;
        if abandoned > 0 {
            info!(abandoned, "abandoned checked-out messages on dispose");
        }
        Ok(abandoned)
    }

    /// Remove every item of `queue` together with its overflow blobs.
    pub async fn clear(&self, queue: &str) -> Result<(), StorageError> {
        let cleared = retry(&TransientServerError, || async move {
            Ok(self.queues.clear(queue).await?)
        })
        .await;
        match cleared {
            Err(err) if err.is_queue_not_found() => {}
            outcome => outcome?,
        }
        self.blobs
            .delete_all_blobs(OVERFLOW_CONTAINER, &format!("{queue}/"))
            .await?;
        Ok(())
    }

    /// Returns `true` when the queue existed.
    pub async fn delete_queue(&self, queue: &str) -> Result<bool, StorageError> {
        let existed = retry(&TransientServerError, || async move {
            Ok(self.queues.delete_queue(queue).await?)
        })
        .await;
        let existed = match existed {
            Err(err) if err.is_queue_not_found() => false,
            outcome => outcome?,
        };
        self.blobs
            .delete_all_blobs(OVERFLOW_CONTAINER, &format!("{queue}/"))
            .await?;
        Ok(existed)
    }

    pub async fn list_queues(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        retry(&TransientServerError, || async move {
            Ok(self.queues.list_queues(prefix).await?)
        })
        .await
    }

    /// Items in `queue`, visible or not. A missing queue counts as empty.
    pub async fn approximate_count(&self, queue: &str) -> Result<usize, StorageError> {
        let counted = retry(&TransientServerError, || async move {
            Ok(self.queues.approximate_count(queue).await?)
        })
        .await;
        match counted {
            Err(err) if err.is_queue_not_found() => Ok(0),
            outcome => outcome,
        }
    }

    /// Age of the oldest visible item, `None` when there is none.
    pub async fn approximate_latency(&self, queue: &str) -> Result<Option<Duration>, StorageError> {
        let peeked = retry(&TransientServerError, || async move {
            Ok(self.queues.peek_first(queue).await?)
        })
        .await;
        let oldest = match peeked {
            Ok(oldest) => oldest,
            Err(err) if err.is_queue_not_found() => None,
            Err(err) => return Err(err),
        };
        Ok(oldest.map(|message| {
            (self.clock.now() - message.insertion_time)
                .to_std()
                .unwrap_or(Duration::ZERO)
        }))
    }

    /// Wrapper stored in a raw queue item, looking through an envelope.
    fn wrapper_in(&self, raw: &[u8]) -> Option<MessageWrapper> {
        let unpacked = unpack(self.serializer(), raw);
        parse_wrapper(self.serializer(), &unpacked.payload).ok()
    }
}

#[async_trait]
impl Finalizer for QueueStorageProvider {
    fn name(&self) -> &str {
        "queue-storage"
    }

    async fn finalize(&self) -> Result<(), MonitorError> {
        self.dispose()
            .await
            .map(|_| ())
            .map_err(|err| MonitorError(err.to_string()))
    }
}

/// Strip an envelope if there is one.
fn unpack(serializer: &dyn DataSerializer, raw: &[u8]) -> Unpacked {
    let envelope = serializer
        .deserialize(raw)
        .ok()
        .and_then(|value| MessageEnvelope::from_value(&value));
    match envelope {
        Some(envelope) => Unpacked {
            payload: envelope.raw_message,
            carried_count: envelope.dequeue_count,
            enveloped: true,
        },
        None => Unpacked {
            payload: raw.to_vec(),
            carried_count: 0,
            enveloped: false,
        },
    }
}

fn parse_wrapper(
    serializer: &dyn DataSerializer,
    bytes: &[u8],
) -> Result<MessageWrapper, StorageError> {
    let value = serializer.deserialize(bytes)?;
    MessageWrapper::from_value(&value)
        .ok_or_else(|| StorageError::Serialization("not an overflow wrapper".to_string()))
}
