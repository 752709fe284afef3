//! Port implementations.
//!
//! - in-memory transports honoring the platform contracts (development, tests)
//! - JSON serializer
//! - service executors, execution statistics, restart triggers

pub mod executor;
pub mod inmem_blob;
pub mod inmem_queue;
pub mod json_serializer;
pub mod monitor;
pub mod restart;

pub use self::executor::{DirectExecutor, MonitoredExecutor};
pub use self::inmem_blob::InMemoryBlobTransport;
pub use self::inmem_queue::InMemoryQueueTransport;
pub use self::json_serializer::JsonSerializer;
pub use self::monitor::ExecutionStatsMonitor;
pub use self::restart::BlobChangeTrigger;
