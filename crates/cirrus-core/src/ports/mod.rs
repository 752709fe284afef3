//! Ports: the seams between the runtime core and the outside world.
//!
//! - raw platform storage (`QueueTransport`, `BlobTransport`)
//! - payload encoding (`DataSerializer`)
//! - time and naming (`Clock`, `IdGenerator`)
//! - worker services and host hooks (`WorkerService`, `ServiceMonitor`, ...)

pub mod blob_transport;
pub mod clock;
pub mod id_generator;
pub mod monitor;
pub mod queue_transport;
pub mod serializer;
pub mod service;

pub use self::blob_transport::{BlobTransport, LeaseAction, RawBlob, ReadCondition, WriteCondition};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::monitor::{DiagnosticsSink, Finalizer, MonitorError, RestartTrigger, ServiceMonitor};
pub use self::queue_transport::{
    MAX_ENCODED_MESSAGE_SIZE, MessageHandle, QueueTransport, RawMessage, encoded_len,
};
pub use self::serializer::{DataSerializer, serialize_as, try_deserialize_as};
pub use self::service::{ServiceExecutor, WorkerService};
