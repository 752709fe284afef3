//! In-process execution statistics.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;

use crate::domain::ServiceFeedback;
use crate::observability::ServiceStats;
use crate::ports::{DiagnosticsSink, MonitorError, ServiceMonitor};

#[derive(Default)]
struct State {
    stats: BTreeMap<String, ServiceStats>,
    started: HashMap<String, Instant>,
}

/// Counts turns and busy time per service; `flush` logs a summary.
#[derive(Default)]
pub struct ExecutionStatsMonitor {
    state: Mutex<State>,
}

impl ExecutionStatsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ServiceStats> {
        self.lock().stats.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ServiceMonitor for ExecutionStatsMonitor {
    fn begin(&self, service: &str) -> Result<(), MonitorError> {
        let mut state = self.lock();
        if state.started.insert(service.to_string(), Instant::now()).is_some() {
            return Err(MonitorError(format!("{service} is already running")));
        }
        Ok(())
    }

    fn end(&self, service: &str, feedback: Option<ServiceFeedback>) -> Result<(), MonitorError> {
        let mut state = self.lock();
        let started = state
            .started
            .remove(service)
            .ok_or_else(|| MonitorError(format!("{service} ended without beginning")))?;
        let stats = state.stats.entry(service.to_string()).or_default();
        stats.invocations += 1;
        stats.busy_time += started.elapsed();
        match feedback {
            Some(ServiceFeedback::WorkAvailable) => stats.work_available += 1,
            Some(ServiceFeedback::DontCare) => stats.dont_care += 1,
            Some(ServiceFeedback::Skipped) => stats.skipped += 1,
            Some(ServiceFeedback::Failed) => stats.failed += 1,
            None => stats.errors += 1,
        }
        Ok(())
    }
}

#[async_trait]
impl DiagnosticsSink for ExecutionStatsMonitor {
    async fn flush(&self) -> Result<(), MonitorError> {
        for (service, stats) in self.snapshot() {
            info!(
                service,
                invocations = stats.invocations,
                work_available = stats.work_available,
                skipped = stats.skipped,
                failed = stats.failed,
                errors = stats.errors,
                busy_ms = stats.busy_time.as_millis() as u64,
                "service statistics"
            );
        }
        Ok(())
    }
}
