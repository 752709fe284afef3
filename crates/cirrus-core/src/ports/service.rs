//! WorkerService and ServiceExecutor ports.

use async_trait::async_trait;

use crate::domain::{ServiceError, ServiceFeedback};

/// A unit of work the scheduler invokes over and over.
///
/// One call is one "turn": do a bounded amount of work, then report what
/// happened. Errors are not caught by the scheduler.
#[async_trait]
pub trait WorkerService: Send + Sync {
    /// Unique name within a host.
    fn name(&self) -> &str;

    async fn run(&self) -> Result<ServiceFeedback, ServiceError>;
}

/// Invocation callback the scheduler goes through for every turn.
#[async_trait]
pub trait ServiceExecutor: Send + Sync {
    async fn execute(&self, service: &dyn WorkerService) -> Result<ServiceFeedback, ServiceError>;
}
