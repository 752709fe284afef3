//! Hooks the runtime host calls around and after service execution.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{RestartReason, ServiceFeedback};

#[derive(Debug, Error)]
#[error("monitor failure: {0}")]
pub struct MonitorError(pub String);

/// Scoped instrumentation around each invocation.
///
/// Failures are logged by the caller and never affect scheduling.
pub trait ServiceMonitor: Send + Sync {
    fn begin(&self, service: &str) -> Result<(), MonitorError>;

    /// `feedback` is `None` when the turn returned an error.
    fn end(&self, service: &str, feedback: Option<ServiceFeedback>) -> Result<(), MonitorError>;
}

/// Best-effort flush of buffered diagnostics at host termination.
#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    async fn flush(&self) -> Result<(), MonitorError>;
}

/// Releases resources held by in-flight service work (checked-out messages,
/// leases) when the host stops.
#[async_trait]
pub trait Finalizer: Send + Sync {
    fn name(&self) -> &str;

    async fn finalize(&self) -> Result<(), MonitorError>;
}

/// Polled by the host; returning a reason stops the scheduler and recycles
/// the process.
#[async_trait]
pub trait RestartTrigger: Send + Sync {
    async fn check(&self) -> Option<RestartReason>;
}
