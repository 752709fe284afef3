//! In-process checkout table.
//!
//! A message is "checked out" between a successful `get` and the matching
//! delete / abandon / persist / resume-later. Records are keyed by message
//! value (canonical JSON bytes), so identical messages delivered twice share
//! one record holding two raw handles. A record disappears when its last
//! handle is checked in.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::StorageError;
use crate::ports::MessageHandle;

/// Identity of a logical message: its canonical JSON encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct MessageKey(Vec<u8>);

impl MessageKey {
    pub(crate) fn of<T: Serialize + ?Sized>(message: &T) -> Result<Self, StorageError> {
        // Going through `Value` sorts object keys, so field order never
        // changes the identity.
        let value = serde_json::to_value(message).map_err(StorageError::serialization)?;
        serde_json::to_vec(&value)
            .map(MessageKey)
            .map_err(StorageError::serialization)
    }
}

/// One checked-out raw delivery.
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub handle: MessageHandle,

    /// Bytes exactly as stored in the queue (possibly an envelope).
    pub raw: Vec<u8>,

    pub insertion_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct InProcessMessage {
    pub queue_name: String,
    pub deliveries: Vec<Delivery>,

    /// Unpacked payload: the serialized `T`, or the wrapper bytes when
    /// `is_overflowing` and the unwrap pass has not run yet.
    pub data: Vec<u8>,

    /// The queue item is a wrapper pointing at an overflow blob.
    pub is_overflowing: bool,

    /// Platform redeliveries plus envelope-carried count.
    pub dequeue_count: u32,
}

/// What `check_in` hands back for one delivery.
#[derive(Debug, Clone)]
pub(crate) struct CheckedIn {
    pub queue_name: String,
    pub delivery: Delivery,
    pub data: Vec<u8>,
    pub is_overflowing: bool,
    pub dequeue_count: u32,
}

#[derive(Debug, Default)]
pub(crate) struct CheckoutTable {
    records: HashMap<MessageKey, InProcessMessage>,
}

impl CheckoutTable {
    pub(crate) fn check_out(&mut self, key: MessageKey, message: InProcessMessage) {
        match self.records.get_mut(&key) {
            Some(existing) => {
                existing.deliveries.extend(message.deliveries);
                existing.dequeue_count = existing.dequeue_count.max(message.dequeue_count);
            }
            None => {
                self.records.insert(key, message);
            }
        }
    }

    /// Remove one delivery of `key`; `None` when nothing is checked out.
    pub(crate) fn check_in(&mut self, key: &MessageKey) -> Option<CheckedIn> {
        let record = self.records.get_mut(key)?;
        if record.deliveries.is_empty() {
            self.records.remove(key);
            return None;
        }
        let delivery = record.deliveries.remove(0);
        let checked_in = CheckedIn {
            queue_name: record.queue_name.clone(),
            delivery,
            data: record.data.clone(),
            is_overflowing: record.is_overflowing,
            dequeue_count: record.dequeue_count,
        };
        if record.deliveries.is_empty() {
            self.records.remove(key);
        }
        Some(checked_in)
    }

    /// Move the record of `from` under `to`, after the overflow payload has
    /// been fetched. Returns `false` when `from` is not checked out anymore.
    pub(crate) fn rekey(&mut self, from: &MessageKey, to: MessageKey, data: Vec<u8>) -> bool {
        let Some(mut record) = self.records.remove(from) else {
            return false;
        };
        record.data = data;
        self.check_out(to, record);
        true
    }

    /// Drop the whole record of `key`.
    pub(crate) fn discard(&mut self, key: &MessageKey) -> Option<InProcessMessage> {
        self.records.remove(key)
    }

    pub(crate) fn keys(&self) -> Vec<MessageKey> {
        self.records.keys().cloned().collect()
    }

    /// Number of checked-out raw deliveries.
    pub(crate) fn delivery_count(&self) -> usize {
        self.records.values().map(|r| r.deliveries.len()).sum()
    }
}
