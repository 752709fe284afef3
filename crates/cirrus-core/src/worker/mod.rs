//! Ready-made worker services.
//!
//! - `QueueWorker`: drains a queue through a `MessageHandler`
//! - `PeriodicService`: a job run at most once per period, cluster-wide

pub mod handler;
pub mod periodic;
pub mod queue_worker;

pub use self::handler::MessageHandler;
pub use self::periodic::{PeriodicJob, PeriodicService, SERVICES_CONTAINER, ScheduleState};
pub use self::queue_worker::{QueueWorker, QueueWorkerSettings};
