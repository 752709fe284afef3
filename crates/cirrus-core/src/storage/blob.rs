//! Blob storage provider: typed key/value access over a `BlobTransport`.
//!
//! - "not found" is always an empty result, never an error
//! - every write records the MD5 of the bytes in the `cirrus-md5` metadata
//!   entry, every read verifies it (`StorageError::DataCorruption` on
//!   mismatch, retried by `NetworkCorruption`)
//! - etags give optimistic concurrency; `upsert_or_skip` is the
//!   read-compute-conditional-write loop built on them
//! - containers are created lazily on first write

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::domain::{Etag, IfModified, LeaseId, LeaseResponse, StorageError, TransportError};
use crate::ports::{
    BlobTransport, DataSerializer, LeaseAction, RawBlob, ReadCondition, WriteCondition,
    serialize_as, try_deserialize_as,
};
use crate::retry::{
    NetworkCorruption, OptimisticConcurrency, RetryDecision, RetryPolicy, SlowInstantiation,
    TransientServerError, retry,
};

/// Metadata entry holding the base64 MD5 of the blob content.
pub const MD5_METADATA_KEY: &str = "cirrus-md5";

enum Download {
    Found(RawBlob),
    NotModified,
    Absent,
}

enum Upserted<T> {
    Written(T),
    Unchanged { existed: bool },
}

pub struct BlobStorageProvider {
    transport: Arc<dyn BlobTransport>,
    serializer: Arc<dyn DataSerializer>,
}

impl BlobStorageProvider {
    pub fn new(transport: Arc<dyn BlobTransport>, serializer: Arc<dyn DataSerializer>) -> Self {
        Self {
            transport,
            serializer,
        }
    }

    pub fn serializer(&self) -> &dyn DataSerializer {
        self.serializer.as_ref()
    }

    // ---- containers ----

    /// Returns `true` when the container was created by this call.
    pub async fn create_container_if_not_exist(&self, container: &str) -> Result<bool, StorageError> {
        // A container deleted moments ago reports "being deleted" for a while.
        let policy = SlowInstantiation.or(TransientServerError);
        retry(&policy, || async move {
            Ok(self.transport.create_container(container).await?)
        })
        .await
    }

    /// Returns `true` when the container existed.
    pub async fn delete_container_if_exist(&self, container: &str) -> Result<bool, StorageError> {
        retry(&TransientServerError, || async move {
            match self.transport.delete_container(container).await {
                Ok(existed) => Ok(existed),
                Err(TransportError::ContainerNotFound(_)) => Ok(false),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    pub async fn list_containers(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        retry(&TransientServerError, || async move {
            Ok(self.transport.list_containers(prefix).await?)
        })
        .await
    }

    // ---- reads ----

    async fn download(
        &self,
        container: &str,
        name: &str,
        condition: &ReadCondition,
    ) -> Result<Download, StorageError> {
        let policy = NetworkCorruption.or(TransientServerError);
        retry(&policy, || async move {
            match self.transport.get(container, name, condition).await {
                Ok(blob) => {
                    verify_checksum(container, name, &blob)?;
                    Ok(Download::Found(blob))
                }
                Err(TransportError::NotModified) => Ok(Download::NotModified),
                Err(err) if err.is_blob_absent() => Ok(Download::Absent),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    /// Raw bytes of a blob, `None` when it or its container does not exist.
    pub async fn get_bytes(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        match self.download(container, name, &ReadCondition::None).await? {
            Download::Found(blob) => Ok(Some(blob.data)),
            Download::NotModified | Download::Absent => Ok(None),
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<T>, StorageError> {
        Ok(self
            .get_with_etag(container, name)
            .await?
            .map(|(value, _)| value))
    }

    pub async fn get_with_etag<T: DeserializeOwned>(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<(T, Etag)>, StorageError> {
        match self.download(container, name, &ReadCondition::None).await? {
            Download::Found(blob) => {
                let value = try_deserialize_as(self.serializer(), &blob.data)?;
                Ok(Some((value, blob.etag)))
            }
            Download::NotModified | Download::Absent => Ok(None),
        }
    }

    /// Conditional read. With `old_etag == None` this is a plain `get`.
    pub async fn get_if_modified<T: DeserializeOwned>(
        &self,
        container: &str,
        name: &str,
        old_etag: Option<&Etag>,
    ) -> Result<IfModified<T>, StorageError> {
        let condition = match old_etag {
            Some(etag) => ReadCondition::IfNoneMatch(etag.clone()),
            None => ReadCondition::None,
        };
        match self.download(container, name, &condition).await? {
            Download::Found(blob) => {
                let value = try_deserialize_as(self.serializer(), &blob.data)?;
                Ok(IfModified::Modified {
                    value,
                    etag: blob.etag,
                })
            }
            Download::NotModified => Ok(IfModified::NotModified),
            Download::Absent => Ok(IfModified::NotFound),
        }
    }

    pub async fn get_blob_etag(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<Etag>, StorageError> {
        retry(&TransientServerError, || async move {
            match self.transport.etag(container, name).await {
                Ok(etag) => Ok(etag),
                Err(err) if err.is_blob_absent() => Ok(None),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    pub async fn list_blob_names(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<String>, StorageError> {
        retry(&TransientServerError, || async move {
            match self.transport.list(container, prefix).await {
                Ok(names) => Ok(names),
                Err(TransportError::ContainerNotFound(_)) => Ok(Vec::new()),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    // ---- writes ----

    async fn write<P: RetryPolicy>(
        &self,
        policy: &P,
        container: &str,
        name: &str,
        data: &[u8],
        condition: &WriteCondition,
    ) -> Result<Etag, StorageError> {
        let metadata = &checksum_metadata(data);
        retry(policy, || async move {
            Ok(self
                .transport
                .put(container, name, data, metadata.clone(), condition)
                .await?)
        })
        .await
    }

    /// Write with a condition; `None` when the condition was not met.
    async fn put_with_condition(
        &self,
        container: &str,
        name: &str,
        data: &[u8],
        condition: &WriteCondition,
    ) -> Result<Option<Etag>, StorageError> {
        let mut outcome = self
            .write(&TransientServerError, container, name, data, condition)
            .await;

        if matches!(
            outcome.as_ref().map_err(StorageError::transport),
            Err(Some(TransportError::ContainerNotFound(_)))
        ) {
            debug!(container, "creating container on first write");
            self.create_container_if_not_exist(container).await?;
            let policy = SlowInstantiation.or(TransientServerError);
            outcome = self.write(&policy, container, name, data, condition).await;
        }

        match outcome {
            Ok(etag) => Ok(Some(etag)),
            Err(StorageError::Transport(TransportError::ConditionNotMet)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Store raw bytes.
    ///
    /// - `overwrite == false` and the blob exists: nothing written, `None`
    /// - `expected_etag` given and stale (or blob absent): nothing written, `None`
    pub async fn put_bytes(
        &self,
        container: &str,
        name: &str,
        data: &[u8],
        overwrite: bool,
        expected_etag: Option<&Etag>,
    ) -> Result<Option<Etag>, StorageError> {
        let condition = match (expected_etag, overwrite) {
            (Some(etag), _) => WriteCondition::IfMatch(etag.clone()),
            (None, false) => WriteCondition::IfNotExists,
            (None, true) => WriteCondition::None,
        };
        self.put_with_condition(container, name, data, &condition)
            .await
    }

    pub async fn put<T: Serialize + ?Sized>(
        &self,
        container: &str,
        name: &str,
        value: &T,
        overwrite: bool,
        expected_etag: Option<&Etag>,
    ) -> Result<Option<Etag>, StorageError> {
        let data = serialize_as(self.serializer(), value)?;
        self.put_bytes(container, name, &data, overwrite, expected_etag)
            .await
    }

    /// Read-compute-conditional-write loop.
    ///
    /// `insert` runs when the blob is absent, `update` otherwise; either may
    /// return `None` to leave the blob untouched. Both may run several times.
    /// On etag conflict the loop waits a jittered delay and starts over from
    /// the download.
    pub async fn upsert_or_skip<T, I, U>(
        &self,
        container: &str,
        name: &str,
        insert: I,
        update: U,
    ) -> Result<Option<T>, StorageError>
    where
        T: Serialize + DeserializeOwned,
        I: FnMut() -> Option<T>,
        U: FnMut(T) -> Option<T>,
    {
        match self.upsert(container, name, insert, update).await? {
            Upserted::Written(value) => Ok(Some(value)),
            Upserted::Unchanged { .. } => Ok(None),
        }
    }

    /// Like `upsert_or_skip`, but an empty result deletes the blob.
    ///
    /// The delete is a separate best-effort call issued after the computation.
    pub async fn upsert_or_delete<T, I, U>(
        &self,
        container: &str,
        name: &str,
        insert: I,
        update: U,
    ) -> Result<Option<T>, StorageError>
    where
        T: Serialize + DeserializeOwned,
        I: FnMut() -> Option<T>,
        U: FnMut(T) -> Option<T>,
    {
        match self.upsert(container, name, insert, update).await? {
            Upserted::Written(value) => Ok(Some(value)),
            Upserted::Unchanged { existed } => {
                if existed {
                    self.delete_blob_if_exist(container, name).await?;
                }
                Ok(None)
            }
        }
    }

    async fn upsert<T, I, U>(
        &self,
        container: &str,
        name: &str,
        mut insert: I,
        mut update: U,
    ) -> Result<Upserted<T>, StorageError>
    where
        T: Serialize + DeserializeOwned,
        I: FnMut() -> Option<T>,
        U: FnMut(T) -> Option<T>,
    {
        let conflict: StorageError = TransportError::ConditionNotMet.into();
        let mut attempt = 0u32;
        loop {
            let current = self.get_with_etag::<T>(container, name).await?;
            let existed = current.is_some();
            let (next, condition) = match current {
                None => (insert(), WriteCondition::IfNotExists),
                Some((value, etag)) => (update(value), WriteCondition::IfMatch(etag)),
            };
            let Some(next) = next else {
                return Ok(Upserted::Unchanged { existed });
            };

            let data = serialize_as(self.serializer(), &next)?;
            if self
                .put_with_condition(container, name, &data, &condition)
                .await?
                .is_some()
            {
                return Ok(Upserted::Written(next));
            }

            match OptimisticConcurrency.decide(attempt, &conflict) {
                RetryDecision::Retry(delay) => {
                    debug!(container, name, attempt, ?delay, "upsert lost an etag race");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::Fatal => {
                    warn!(container, name, attempt, "upsert contention retries exhausted");
                    return Err(StorageError::ContentionTimeout {
                        container: container.to_string(),
                        name: name.to_string(),
                    });
                }
            }
        }
    }

    // ---- deletes ----

    /// Returns `true` when the blob existed.
    pub async fn delete_blob_if_exist(
        &self,
        container: &str,
        name: &str,
    ) -> Result<bool, StorageError> {
        retry(&TransientServerError, || async move {
            match self.transport.delete(container, name).await {
                Ok(existed) => Ok(existed),
                Err(err) if err.is_blob_absent() => Ok(false),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    /// Delete every blob of `container` whose name starts with `prefix`.
    pub async fn delete_all_blobs(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<usize, StorageError> {
        let mut deleted = 0;
        for name in self.list_blob_names(container, prefix).await? {
            if self.delete_blob_if_exist(container, &name).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    // ---- leases ----

    pub async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        duration: Duration,
    ) -> Result<LeaseResponse, StorageError> {
        retry(&TransientServerError, || async move {
            let action = LeaseAction::Acquire { duration };
            match self.transport.lease(container, name, action).await {
                Ok(Some(id)) => Ok(LeaseResponse::Acquired(id)),
                Ok(None) => Err(TransportError::Internal("lease granted without an id".into()).into()),
                Err(TransportError::LeaseConflict) => Ok(LeaseResponse::Conflict),
                Err(err) if err.is_blob_absent() => Ok(LeaseResponse::NotFound),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    /// `false` when the lease is not held by `lease_id` or the blob is gone.
    pub async fn release_lease(
        &self,
        container: &str,
        name: &str,
        lease_id: &LeaseId,
    ) -> Result<bool, StorageError> {
        self.lease_pass_through(container, name, || LeaseAction::Release(lease_id.clone()))
            .await
    }

    pub async fn renew_lease(
        &self,
        container: &str,
        name: &str,
        lease_id: &LeaseId,
    ) -> Result<bool, StorageError> {
        self.lease_pass_through(container, name, || LeaseAction::Renew(lease_id.clone()))
            .await
    }

    async fn lease_pass_through<A>(
        &self,
        container: &str,
        name: &str,
        action: A,
    ) -> Result<bool, StorageError>
    where
        A: Fn() -> LeaseAction,
    {
        let action = &action;
        retry(&TransientServerError, || async move {
            match self.transport.lease(container, name, action()).await {
                Ok(_) => Ok(true),
                Err(TransportError::LeaseConflict) => Ok(false),
                Err(err) if err.is_blob_absent() => Ok(false),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }
}

fn content_md5(data: &[u8]) -> String {
    STANDARD.encode(Md5::digest(data))
}

fn checksum_metadata(data: &[u8]) -> HashMap<String, String> {
    HashMap::from([(MD5_METADATA_KEY.to_string(), content_md5(data))])
}

/// Blobs written without a checksum (by other tools) are accepted as is.
fn verify_checksum(container: &str, name: &str, blob: &RawBlob) -> Result<(), StorageError> {
    match blob.metadata.get(MD5_METADATA_KEY) {
        Some(expected) if *expected != content_md5(&blob.data) => {
            warn!(container, name, "blob checksum mismatch");
            Err(StorageError::DataCorruption {
                container: container.to_string(),
                name: name.to_string(),
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryBlobTransport, JsonSerializer};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    fn provider() -> (Arc<InMemoryBlobTransport>, Arc<BlobStorageProvider>) {
        let transport = Arc::new(InMemoryBlobTransport::new());
        let provider = BlobStorageProvider::new(transport.clone(), Arc::new(JsonSerializer));
        (transport, Arc::new(provider))
    }

    #[tokio::test]
    async fn missing_container_or_blob_is_empty() {
        let (_, blobs) = provider();
        assert_eq!(blobs.get::<Counter>("nope", "n").await.unwrap(), None);
        assert_eq!(blobs.get_blob_etag("nope", "n").await.unwrap(), None);
        assert!(blobs.list_blob_names("nope", "").await.unwrap().is_empty());
        assert!(!blobs.delete_blob_if_exist("nope", "n").await.unwrap());
    }

    #[tokio::test]
    async fn put_creates_the_container_lazily() {
        let (_, blobs) = provider();
        let etag = blobs
            .put("c", "n", &Counter { value: 1 }, true, None)
            .await
            .unwrap();
        assert!(etag.is_some());
        assert_eq!(
            blobs.get::<Counter>("c", "n").await.unwrap(),
            Some(Counter { value: 1 })
        );
        assert_eq!(blobs.list_containers("").await.unwrap(), vec!["c"]);
    }

    #[tokio::test]
    async fn put_without_overwrite_keeps_existing_blob() {
        let (_, blobs) = provider();
        blobs.put("c", "n", &1u32, false, None).await.unwrap().unwrap();
        assert_eq!(blobs.put("c", "n", &2u32, false, None).await.unwrap(), None);
        assert_eq!(blobs.get::<u32>("c", "n").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn etag_compare_and_swap() {
        let (_, blobs) = provider();
        let stale = blobs.put("c", "n", &1u32, true, None).await.unwrap().unwrap();
        let current = blobs.put("c", "n", &2u32, true, None).await.unwrap().unwrap();

        assert_eq!(blobs.put("c", "n", &3u32, true, Some(&stale)).await.unwrap(), None);
        assert_eq!(blobs.get::<u32>("c", "n").await.unwrap(), Some(2));

        let next = blobs
            .put("c", "n", &4u32, true, Some(&current))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(next, current);
        assert_eq!(blobs.get_with_etag::<u32>("c", "n").await.unwrap(), Some((4, next)));
    }

    #[tokio::test]
    async fn get_if_modified_distinguishes_outcomes() {
        let (_, blobs) = provider();
        let missing = blobs.get_if_modified::<u32>("c", "n", None).await.unwrap();
        assert_eq!(missing, IfModified::NotFound);

        let etag = blobs.put("c", "n", &1u32, true, None).await.unwrap().unwrap();
        let unchanged = blobs
            .get_if_modified::<u32>("c", "n", Some(&etag))
            .await
            .unwrap();
        assert_eq!(unchanged, IfModified::NotModified);

        let newer = blobs.put("c", "n", &2u32, true, None).await.unwrap().unwrap();
        let changed = blobs
            .get_if_modified::<u32>("c", "n", Some(&etag))
            .await
            .unwrap();
        assert_eq!(
            changed,
            IfModified::Modified {
                value: 2,
                etag: newer
            }
        );
    }

    #[tokio::test]
    async fn corruption_is_retried_then_surfaces() {
        let (transport, blobs) = provider();
        blobs.put("c", "n", &7u32, true, None).await.unwrap();
        transport.corrupt("c", "n");

        let err = blobs.get::<u32>("c", "n").await.unwrap_err();
        assert_eq!(
            err,
            StorageError::DataCorruption {
                container: "c".into(),
                name: "n".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_faults_are_retried() {
        let (transport, blobs) = provider();
        blobs.put("c", "n", &7u32, true, None).await.unwrap();
        transport.inject_fault(TransportError::ServerBusy);
        transport.inject_fault(TransportError::ConnectionReset);
        assert_eq!(blobs.get::<u32>("c", "n").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn upsert_or_skip_inserts_updates_and_skips() {
        let (_, blobs) = provider();
        let inserted = blobs
            .upsert_or_skip("c", "n", || Some(Counter { value: 1 }), |c| Some(c))
            .await
            .unwrap();
        assert_eq!(inserted, Some(Counter { value: 1 }));

        let updated = blobs
            .upsert_or_skip(
                "c",
                "n",
                || None,
                |c: Counter| Some(Counter { value: c.value + 1 }),
            )
            .await
            .unwrap();
        assert_eq!(updated, Some(Counter { value: 2 }));

        let etag = blobs.get_blob_etag("c", "n").await.unwrap();
        let skipped = blobs
            .upsert_or_skip("c", "n", || None, |_: Counter| None)
            .await
            .unwrap();
        assert_eq!(skipped, None);
        assert_eq!(blobs.get_blob_etag("c", "n").await.unwrap(), etag);
    }

    #[tokio::test]
    async fn upsert_or_delete_removes_blob_on_empty_result() {
        let (_, blobs) = provider();
        blobs.put("c", "n", &Counter { value: 3 }, true, None).await.unwrap();
        let result = blobs
            .upsert_or_delete("c", "n", || None, |_: Counter| None)
            .await
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(blobs.get::<Counter>("c", "n").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_do_not_lose_updates() {
        let (_, blobs) = provider();
        const K: u32 = 16;

        let tasks: Vec<_> = (0..K)
            .map(|_| {
                let blobs = blobs.clone();
                tokio::spawn(async move {
                    blobs
                        .upsert_or_skip(
                            "counters",
                            "hits",
                            || Some(1u32),
                            |n: u32| Some(n + 1),
                        )
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(blobs.get::<u32>("counters", "hits").await.unwrap(), Some(K));
    }

    #[tokio::test]
    async fn delete_all_blobs_by_prefix() {
        let (_, blobs) = provider();
        for name in ["a/1", "a/2", "b/1"] {
            blobs.put("c", name, &0u32, true, None).await.unwrap();
        }
        assert_eq!(blobs.delete_all_blobs("c", "a/").await.unwrap(), 2);
        assert_eq!(blobs.list_blob_names("c", "").await.unwrap(), vec!["b/1"]);
    }

    #[tokio::test]
    async fn lease_contention_is_a_value() {
        let (_, blobs) = provider();
        let ttl = Duration::from_secs(60);
        assert_eq!(
            blobs.acquire_lease("c", "n", ttl).await.unwrap(),
            LeaseResponse::NotFound
        );

        blobs.put("c", "n", &0u32, true, None).await.unwrap();
        let LeaseResponse::Acquired(id) = blobs.acquire_lease("c", "n", ttl).await.unwrap() else {
            panic!("expected lease");
        };
        assert_eq!(
            blobs.acquire_lease("c", "n", ttl).await.unwrap(),
            LeaseResponse::Conflict
        );
        assert!(blobs.renew_lease("c", "n", &id).await.unwrap());
        assert!(blobs.release_lease("c", "n", &id).await.unwrap());
        assert!(!blobs.release_lease("c", "n", &id).await.unwrap());
    }
}
