//! Service executors: how the scheduler invokes one service turn.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::{ServiceError, ServiceFeedback};
use crate::ports::{ServiceExecutor, ServiceMonitor, WorkerService};

/// Calls the service, nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectExecutor;

#[async_trait]
impl ServiceExecutor for DirectExecutor {
    async fn execute(&self, service: &dyn WorkerService) -> Result<ServiceFeedback, ServiceError> {
        service.run().await
    }
}

/// Wraps every turn in `ServiceMonitor::begin` / `end`.
///
/// Monitor failures are logged and otherwise ignored.
pub struct MonitoredExecutor {
    monitor: Arc<dyn ServiceMonitor>,
}

impl MonitoredExecutor {
    pub fn new(monitor: Arc<dyn ServiceMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl ServiceExecutor for MonitoredExecutor {
    async fn execute(&self, service: &dyn WorkerService) -> Result<ServiceFeedback, ServiceError> {
        let name = service.name();
        if let Err(err) = self.monitor.begin(name) {
            warn!(service = name, error = %err, "monitor begin failed");
        }
        let result = service.run().await;
        if let Err(err) = self.monitor.end(name, result.as_ref().ok().copied()) {
            warn!(service = name, error = %err, "monitor end failed");
        }
        result
    }
}
