//! BlobTransport port: the platform's raw blob primitive.
//!
//! Byte-level get/put/delete with etags, custom metadata, conditional
//! writes and single-writer leases. Absence is reported as
//! `ContainerNotFound` / `BlobNotFound`; failed conditions as
//! `ConditionNotMet` (writes) or `NotModified` (reads).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Etag, LeaseId, TransportError};

/// A downloaded blob.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlob {
    pub data: Vec<u8>,
    pub etag: Etag,
    pub metadata: HashMap<String, String>,
}

/// Condition attached to a read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReadCondition {
    #[default]
    None,

    /// Fails with `NotModified` when the stored etag equals this one.
    IfNoneMatch(Etag),
}

/// Condition attached to a write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WriteCondition {
    #[default]
    None,

    /// Fails with `ConditionNotMet` when the blob already exists.
    IfNotExists,

    /// Fails with `ConditionNotMet` unless the stored etag equals this one.
    IfMatch(Etag),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAction {
    Acquire { duration: Duration },
    Release(LeaseId),
    Renew(LeaseId),
}

#[async_trait]
pub trait BlobTransport: Send + Sync {
    /// Returns `true` when the container was created by this call.
    async fn create_container(&self, container: &str) -> Result<bool, TransportError>;

    /// Returns `true` when the container existed.
    async fn delete_container(&self, container: &str) -> Result<bool, TransportError>;

    async fn list_containers(&self, prefix: &str) -> Result<Vec<String>, TransportError>;

    async fn get(
        &self,
        container: &str,
        name: &str,
        condition: &ReadCondition,
    ) -> Result<RawBlob, TransportError>;

    /// Returns the etag of the written blob.
    async fn put(
        &self,
        container: &str,
        name: &str,
        data: &[u8],
        metadata: HashMap<String, String>,
        condition: &WriteCondition,
    ) -> Result<Etag, TransportError>;

    /// Returns `true` when the blob existed.
    async fn delete(&self, container: &str, name: &str) -> Result<bool, TransportError>;

    /// Current etag, `None` when the blob (or its container) does not exist.
    async fn etag(&self, container: &str, name: &str) -> Result<Option<Etag>, TransportError>;

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, TransportError>;

    /// Acquire returns the granted lease id; release/renew return `None`.
    /// Contention is reported as `LeaseConflict`.
    async fn lease(
        &self,
        container: &str,
        name: &str,
        action: LeaseAction,
    ) -> Result<Option<LeaseId>, TransportError>;
}
