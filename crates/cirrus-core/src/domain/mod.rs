//! Domain model: errors, queue frames, blob identity, persisted messages and
//! service lifecycle signals.

pub mod blob;
pub mod envelope;
pub mod errors;
pub mod lifecycle;
pub mod persisted;

pub use blob::{Etag, IfModified, LeaseId, LeaseResponse};
pub use envelope::{MessageEnvelope, MessageWrapper};
pub use errors::{ServiceError, StorageError, TransportError};
pub use lifecycle::{HostExit, RestartReason, ServiceFeedback};
pub use persisted::{PersistedMessage, PersistedMessageData};
