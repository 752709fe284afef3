//! PeriodicService - runs a job at most once per period across every process
//! sharing the same blob storage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{ServiceError, ServiceFeedback};
use crate::ports::{Clock, SystemClock, WorkerService};
use crate::storage::BlobStorageProvider;

/// Container holding the schedule state of periodic services.
pub const SERVICES_CONTAINER: &str = "cirrus-services";

#[async_trait]
pub trait PeriodicJob: Send + Sync {
    async fn run_once(&self) -> Result<(), ServiceError>;
}

/// Stored under `{SERVICES_CONTAINER}/{name}/schedule`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub last_run: DateTime<Utc>,
    pub claimed_by: String,
}

pub struct PeriodicService<J> {
    name: String,
    instance_id: String,
    period: Duration,
    blobs: Arc<BlobStorageProvider>,
    clock: Arc<dyn Clock>,
    job: J,
}

impl<J: PeriodicJob> PeriodicService<J> {
    pub fn new(
        name: impl Into<String>,
        instance_id: impl Into<String>,
        period: Duration,
        blobs: Arc<BlobStorageProvider>,
        job: J,
    ) -> Self {
        Self {
            name: name.into(),
            instance_id: instance_id.into(),
            period,
            blobs,
            clock: Arc::new(SystemClock),
            job,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn state_blob(&self) -> String {
        format!("{}/schedule", self.name)
    }

    fn is_due(&self, state: &ScheduleState, now: DateTime<Utc>) -> bool {
        // A last run in the future (clock skew) converts to an error: not due.
        now.signed_duration_since(state.last_run)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= self.period)
    }

    /// Claim the current period. Concurrent claimers race on the etag; only
    /// one write wins.
    async fn claim(&self, now: DateTime<Utc>) -> Result<bool, ServiceError> {
        let claimed = || ScheduleState {
            last_run: now,
            claimed_by: self.instance_id.clone(),
        };
        let written = self
            .blobs
            .upsert_or_skip(
                SERVICES_CONTAINER,
                &self.state_blob(),
                || Some(claimed()),
                |state: ScheduleState| self.is_due(&state, now).then(claimed),
            )
            .await?;
        Ok(written.is_some())
    }
}

#[async_trait]
impl<J: PeriodicJob> WorkerService for PeriodicService<J> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<ServiceFeedback, ServiceError> {
        let now = self.clock.now();
        if !self.claim(now).await? {
            debug!(service = %self.name, "not due");
            return Ok(ServiceFeedback::Skipped);
        }
        info!(service = %self.name, instance = %self.instance_id, "running periodic job");
        self.job.run_once().await?;
        Ok(ServiceFeedback::DontCare)
    }
}
