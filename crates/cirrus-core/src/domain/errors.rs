//! Error types and their classification.
//!
//! Layering:
//! - `TransportError`: what a raw queue/blob transport reports.
//! - `StorageError`: what the storage providers surface to callers.
//! - `ServiceError`: what a worker service turn can fail with.
//!
//! "Not found" is modeled here but the providers translate it into empty
//! results; callers only see it for operations where absence is an error.

use thiserror::Error;

/// Errors reported by a raw transport (platform API).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("blob not found: {container}/{name}")]
    BlobNotFound { container: String, name: String },

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("message not found in queue {0}")]
    MessageNotFound(String),

    #[error("pop receipt mismatch in queue {0}")]
    PopReceiptMismatch(String),

    /// If-Match / If-None-Match precondition failed on a write.
    #[error("write condition not met")]
    ConditionNotMet,

    /// Conditional read: the stored etag still matches.
    #[error("not modified")]
    NotModified,

    #[error("lease conflict")]
    LeaseConflict,

    /// The resource is being deleted and cannot be recreated yet.
    #[error("resource is being deleted: {0}")]
    BeingDeleted(String),

    /// The transport refused to encode the message (size or content).
    #[error("message rejected by transport: {0}")]
    MessageRejected(String),

    #[error("server busy")]
    ServerBusy,

    #[error("operation timed out")]
    Timeout,

    #[error("connection reset")]
    ConnectionReset,

    #[error("internal server error: {0}")]
    Internal(String),
}

impl TransportError {
    /// Server-side or network conditions expected to clear on their own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::ServerBusy
                | TransportError::Timeout
                | TransportError::ConnectionReset
                | TransportError::Internal(_)
        )
    }

    /// Container or blob absent.
    pub fn is_blob_absent(&self) -> bool {
        matches!(
            self,
            TransportError::ContainerNotFound(_) | TransportError::BlobNotFound { .. }
        )
    }
}

/// Errors surfaced by the storage providers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The downloaded bytes do not match the checksum recorded at write time.
    #[error("data corruption detected on {container}/{name}: checksum mismatch")]
    DataCorruption { container: String, name: String },

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Optimistic concurrency retries exhausted: pathological write contention.
    #[error("optimistic concurrency retries exhausted on {container}/{name}")]
    ContentionTimeout { container: String, name: String },
}

impl StorageError {
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            StorageError::Transport(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_queue_not_found(&self) -> bool {
        matches!(self.transport(), Some(TransportError::QueueNotFound(_)))
    }

    pub(crate) fn serialization(err: impl std::fmt::Display) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Errors a worker service turn can end with.
///
/// Any error escaping a service is fatal for the scheduling loop; the runtime
/// host decides what to do with it.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    pub fn other(message: impl Into<String>) -> Self {
        ServiceError::Other(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TransportError::ServerBusy.is_transient());
        assert!(TransportError::Internal("boom".into()).is_transient());
        assert!(!TransportError::ConditionNotMet.is_transient());
        assert!(!TransportError::QueueNotFound("q".into()).is_transient());
    }

    #[test]
    fn corruption_is_not_a_transport_error() {
        let err = StorageError::DataCorruption {
            container: "c".into(),
            name: "n".into(),
        };
        assert!(err.transport().is_none());
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn queue_not_found_is_detected_through_storage_error() {
        let err: StorageError = TransportError::QueueNotFound("jobs".into()).into();
        assert!(err.is_queue_not_found());
        assert_eq!(err.to_string(), "queue not found: jobs");
    }
}
