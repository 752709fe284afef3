//! In-memory blob transport for development and tests.
//!
//! Honors the `BlobTransport` contract: fresh etag per write, conditional
//! reads and writes, expiring leases. Faults can be queued with
//! `inject_fault` and stored bytes can be damaged with `corrupt` to exercise
//! the retry paths of the providers.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use ulid::Ulid;

use crate::domain::{Etag, LeaseId, TransportError};
use crate::ports::{BlobTransport, LeaseAction, RawBlob, ReadCondition, WriteCondition};

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    etag: Etag,
    metadata: HashMap<String, String>,
    lease: Option<(LeaseId, Instant)>,
}

impl StoredBlob {
    fn active_lease(&self) -> Option<&LeaseId> {
        self.lease
            .as_ref()
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(id, _)| id)
    }
}

#[derive(Default)]
struct State {
    containers: BTreeMap<String, BTreeMap<String, StoredBlob>>,
    faults: VecDeque<TransportError>,
}

impl State {
    fn take_fault(&mut self) -> Result<(), TransportError> {
        match self.faults.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn container_mut(
        &mut self,
        container: &str,
    ) -> Result<&mut BTreeMap<String, StoredBlob>, TransportError> {
        self.containers
            .get_mut(container)
            .ok_or_else(|| TransportError::ContainerNotFound(container.to_string()))
    }

    fn blob_mut(&mut self, container: &str, name: &str) -> Result<&mut StoredBlob, TransportError> {
        self.container_mut(container)?
            .get_mut(name)
            .ok_or_else(|| TransportError::BlobNotFound {
                container: container.to_string(),
                name: name.to_string(),
            })
    }
}

#[derive(Default)]
pub struct InMemoryBlobTransport {
    state: Mutex<State>,
}

impl InMemoryBlobTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next operation fails with `err`. Faults are consumed in order.
    pub fn inject_fault(&self, err: TransportError) {
        self.lock().faults.push_back(err);
    }

    /// Flip the stored bytes of a blob without touching its metadata.
    /// Returns `false` when the blob does not exist.
    pub fn corrupt(&self, container: &str, name: &str) -> bool {
        let mut state = self.lock();
        match state.blob_mut(container, name) {
            Ok(blob) => {
                blob.data.iter_mut().for_each(|b| *b = !*b);
                if blob.data.is_empty() {
                    blob.data.push(0xff);
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Number of blobs in `container`, 0 when it does not exist.
    pub fn blob_count(&self, container: &str) -> usize {
        self.lock().containers.get(container).map_or(0, BTreeMap::len)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn fresh_etag() -> Etag {
    Etag::new(format!("\"{}\"", Ulid::new()))
}

#[async_trait]
impl BlobTransport for InMemoryBlobTransport {
    async fn create_container(&self, container: &str) -> Result<bool, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        if state.containers.contains_key(container) {
            return Ok(false);
        }
        state.containers.insert(container.to_string(), BTreeMap::new());
        Ok(true)
    }

    async fn delete_container(&self, container: &str) -> Result<bool, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        Ok(state.containers.remove(container).is_some())
    }

    async fn list_containers(&self, prefix: &str) -> Result<Vec<String>, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        Ok(state
            .containers
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(
        &self,
        container: &str,
        name: &str,
        condition: &ReadCondition,
    ) -> Result<RawBlob, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        let blob = state.blob_mut(container, name)?;
        if let ReadCondition::IfNoneMatch(etag) = condition
            && *etag == blob.etag
        {
            return Err(TransportError::NotModified);
        }
        Ok(RawBlob {
            data: blob.data.clone(),
            etag: blob.etag.clone(),
            metadata: blob.metadata.clone(),
        })
    }

    async fn put(
        &self,
        container: &str,
        name: &str,
        data: &[u8],
        metadata: HashMap<String, String>,
        condition: &WriteCondition,
    ) -> Result<Etag, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        let blobs = state.container_mut(container)?;
        let current = blobs.get(name);
        let allowed = match condition {
            WriteCondition::None => true,
            WriteCondition::IfNotExists => current.is_none(),
            WriteCondition::IfMatch(etag) => current.is_some_and(|blob| blob.etag == *etag),
        };
        if !allowed {
            return Err(TransportError::ConditionNotMet);
        }
        // Writes carry no lease id, so a leased blob refuses them.
        if current.is_some_and(|blob| blob.active_lease().is_some()) {
            return Err(TransportError::LeaseConflict);
        }
        let etag = fresh_etag();
        blobs.insert(
            name.to_string(),
            StoredBlob {
                data: data.to_vec(),
                etag: etag.clone(),
                metadata,
                lease: None,
            },
        );
        Ok(etag)
    }

    async fn delete(&self, container: &str, name: &str) -> Result<bool, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        let blobs = state.container_mut(container)?;
        Ok(blobs.remove(name).is_some())
    }

    async fn etag(&self, container: &str, name: &str) -> Result<Option<Etag>, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        Ok(state
            .containers
            .get(container)
            .and_then(|blobs| blobs.get(name))
            .map(|blob| blob.etag.clone()))
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        let blobs = state.container_mut(container)?;
        Ok(blobs
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn lease(
        &self,
        container: &str,
        name: &str,
        action: LeaseAction,
    ) -> Result<Option<LeaseId>, TransportError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.take_fault()?;
        let blob = state.blob_mut(container, name)?;
        match action {
            LeaseAction::Acquire { duration } => {
                if blob.active_lease().is_some() {
                    return Err(TransportError::LeaseConflict);
                }
                let id = LeaseId::new(Ulid::new().to_string());
                blob.lease = Some((id.clone(), Instant::now() + duration));
                Ok(Some(id))
            }
            LeaseAction::Release(id) => {
                if blob.active_lease() != Some(&id) {
                    return Err(TransportError::LeaseConflict);
                }
                blob.lease = None;
                Ok(None)
            }
            LeaseAction::Renew(id) => match &mut blob.lease {
                // Renewing an expired lease is allowed as long as nobody else took it.
                Some((held, expires_at)) if *held == id => {
                    *expires_at = Instant::now() + LEASE_RENEWAL;
                    Ok(None)
                }
                _ => Err(TransportError::LeaseConflict),
            },
        }
    }
}

const LEASE_RENEWAL: Duration = Duration::from_secs(60);

#[cfg(test)]
mod tests {
    use super::*;

    async fn transport_with_container() -> InMemoryBlobTransport {
        let transport = InMemoryBlobTransport::new();
        transport.create_container("c").await.unwrap();
        transport
    }

    #[tokio::test]
    async fn put_requires_container() {
        let transport = InMemoryBlobTransport::new();
        let err = transport
            .put("c", "n", b"x", HashMap::new(), &WriteCondition::None)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::ContainerNotFound("c".into()));
    }

    #[tokio::test]
    async fn conditional_writes() {
        let transport = transport_with_container().await;
        let e1 = transport
            .put("c", "n", b"1", HashMap::new(), &WriteCondition::IfNotExists)
            .await
            .unwrap();
        let err = transport
            .put("c", "n", b"2", HashMap::new(), &WriteCondition::IfNotExists)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::ConditionNotMet);

        let e2 = transport
            .put("c", "n", b"2", HashMap::new(), &WriteCondition::IfMatch(e1.clone()))
            .await
            .unwrap();
        assert_ne!(e1, e2);

        let err = transport
            .put("c", "n", b"3", HashMap::new(), &WriteCondition::IfMatch(e1))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::ConditionNotMet);

        let blob = transport.get("c", "n", &ReadCondition::None).await.unwrap();
        assert_eq!(blob.data, b"2");
        assert_eq!(blob.etag, e2);
    }

    #[tokio::test]
    async fn if_none_match_reports_not_modified() {
        let transport = transport_with_container().await;
        let etag = transport
            .put("c", "n", b"1", HashMap::new(), &WriteCondition::None)
            .await
            .unwrap();
        let err = transport
            .get("c", "n", &ReadCondition::IfNoneMatch(etag))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NotModified);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let transport = transport_with_container().await;
        transport.inject_fault(TransportError::ServerBusy);
        transport.inject_fault(TransportError::Timeout);
        assert_eq!(
            transport.list("c", "").await.unwrap_err(),
            TransportError::ServerBusy
        );
        assert_eq!(
            transport.list("c", "").await.unwrap_err(),
            TransportError::Timeout
        );
        assert!(transport.list("c", "").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn leases_conflict_until_released_or_expired() {
        let transport = transport_with_container().await;
        transport
            .put("c", "n", b"1", HashMap::new(), &WriteCondition::None)
            .await
            .unwrap();
        let acquire = || LeaseAction::Acquire {
            duration: Duration::from_secs(30),
        };

        let id = transport.lease("c", "n", acquire()).await.unwrap().unwrap();
        assert_eq!(
            transport.lease("c", "n", acquire()).await.unwrap_err(),
            TransportError::LeaseConflict
        );
        transport
            .lease("c", "n", LeaseAction::Release(id))
            .await
            .unwrap();

        transport.lease("c", "n", acquire()).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(transport.lease("c", "n", acquire()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn leased_blob_refuses_writes() {
        let transport = transport_with_container().await;
        transport
            .put("c", "n", b"1", HashMap::new(), &WriteCondition::None)
            .await
            .unwrap();
        let id = transport
            .lease(
                "c",
                "n",
                LeaseAction::Acquire {
                    duration: Duration::from_secs(30),
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            transport
                .put("c", "n", b"2", HashMap::new(), &WriteCondition::None)
                .await
                .unwrap_err(),
            TransportError::LeaseConflict
        );

        transport
            .lease("c", "n", LeaseAction::Release(id))
            .await
            .unwrap();
        transport
            .put("c", "n", b"2", HashMap::new(), &WriteCondition::None)
            .await
            .unwrap();
        let blob = transport.get("c", "n", &ReadCondition::None).await.unwrap();
        assert_eq!(blob.data, b"2");
    }
}
