//! Inspection and recovery of persisted messages.

use tracing::info;

use super::{PERSISTED_CONTAINER, QueueStorageProvider, parse_wrapper};
use crate::domain::{PersistedMessage, PersistedMessageData, StorageError};

fn blob_name(store: &str, key: &str) -> String {
    format!("{store}/{key}")
}

impl QueueStorageProvider {
    /// Keys of the messages persisted in `store`, oldest first.
    pub async fn list_persisted(&self, store: &str) -> Result<Vec<String>, StorageError> {
        let prefix = format!("{store}/");
        let names = self
            .blobs
            .list_blob_names(PERSISTED_CONTAINER, &prefix)
            .await?;
        Ok(names
            .into_iter()
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// A persisted message, with a structured view of its payload when the
    /// serializer can still decode it.
    pub async fn get_persisted(
        &self,
        store: &str,
        key: &str,
    ) -> Result<Option<PersistedMessage>, StorageError> {
        let record: Option<PersistedMessageData> = self
            .blobs
            .get(PERSISTED_CONTAINER, &blob_name(store, key))
            .await?;
        let Some(record) = record else {
            return Ok(None);
        };

        // A wrapper left in the record means the overflow blob was already
        // gone when the message got persisted.
        let is_data_available = match parse_wrapper(self.serializer(), &record.data) {
            Ok(wrapper) => self
                .blobs
                .get_blob_etag(&wrapper.container_name, &wrapper.blob_name)
                .await?
                .is_some(),
            Err(_) => true,
        };
        let data_view = self.serializer().deserialize(&record.data).ok();

        Ok(Some(PersistedMessage {
            queue_name: record.queue_name,
            store_name: store.to_string(),
            key: key.to_string(),
            insertion_time: record.insertion_time,
            persistence_time: record.persistence_time,
            dequeue_count: record.dequeue_count,
            reason: record.reason,
            is_data_available,
            data_view,
        }))
    }

    /// Returns `true` when the message existed.
    pub async fn delete_persisted(&self, store: &str, key: &str) -> Result<bool, StorageError> {
        self.blobs
            .delete_blob_if_exist(PERSISTED_CONTAINER, &blob_name(store, key))
            .await
    }

    /// Put a persisted message back into its original queue as a fresh
    /// message, then forget it. Returns `false` when it does not exist.
    pub async fn restore_persisted(&self, store: &str, key: &str) -> Result<bool, StorageError> {
        let name = blob_name(store, key);
        let record: Option<PersistedMessageData> =
            self.blobs.get(PERSISTED_CONTAINER, &name).await?;
        let Some(record) = record else {
            return Ok(false);
        };

        self.enqueue(&record.queue_name, record.data).await?;
        self.blobs
            .delete_blob_if_exist(PERSISTED_CONTAINER, &name)
            .await?;
        info!(store, key, queue = %record.queue_name, "persisted message restored");
        Ok(true)
    }
}
