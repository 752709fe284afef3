//! Adaptive round-robin scheduler.
//!
//! Services are visited in a fixed order. A service reporting
//! `WorkAvailable` or `DontCare` is invoked again right away, for at most
//! `stay_window`, before the rotation moves on. When a whole rotation did no
//! work, the scheduler sleeps `idle_wait` (interruptible) before the next one.
//!
//! Services never run concurrently with each other. Errors from a service
//! are not handled here: they end `run` and go to the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::ServiceError;
use crate::ports::{ServiceExecutor, WorkerService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub stay_window: Duration,
    pub idle_wait: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            stay_window: Duration::from_secs(60),
            idle_wait: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("service '{service}' failed: {source}")]
    Service {
        service: String,
        #[source]
        source: ServiceError,
    },
}

#[derive(Default)]
struct Signals {
    stopped: AtomicBool,
    stop: Notify,
    abort_wait: Notify,
}

/// Cloneable remote control of a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    signals: Arc<Signals>,
}

impl SchedulerHandle {
    /// Stop after the current invocation; wakes an idle wait immediately.
    pub fn stop(&self) {
        self.signals.stopped.store(true, Ordering::SeqCst);
        // notify_one keeps a permit, so a wait that starts later still wakes.
        self.signals.stop.notify_one();
    }

    /// Cut the current idle wait short. No effect when not waiting.
    pub fn abort_waiting_schedule(&self) {
        self.signals.abort_wait.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.signals.stopped.load(Ordering::SeqCst)
    }
}

pub struct Scheduler {
    services: Vec<Arc<dyn WorkerService>>,
    executor: Arc<dyn ServiceExecutor>,
    settings: SchedulerSettings,
    signals: Arc<Signals>,
}

impl Scheduler {
    pub fn new(
        services: Vec<Arc<dyn WorkerService>>,
        executor: Arc<dyn ServiceExecutor>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            services,
            executor,
            settings,
            signals: Arc::new(Signals::default()),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            signals: self.signals.clone(),
        }
    }

    fn is_stopped(&self) -> bool {
        self.signals.stopped.load(Ordering::SeqCst)
    }

    /// Rotate over the services until stopped or a service fails.
    pub async fn run(&self) -> Result<(), SchedulerError> {
        let mut index = 0;
        let mut rotation_did_work = false;
        while !self.is_stopped() {
            if let Some(service) = self.services.get(index) {
                rotation_did_work |= self.turn(service.as_ref()).await?;
                index += 1;
            }
            if index >= self.services.len() {
                if !rotation_did_work && !self.is_stopped() {
                    self.idle_wait().await;
                }
                index = 0;
                rotation_did_work = false;
            }
        }
        debug!("scheduler stopped");
        Ok(())
    }

    /// Invoke one service, greedily, within the stay window. Returns whether
    /// any invocation did work.
    async fn turn(&self, service: &dyn WorkerService) -> Result<bool, SchedulerError> {
        let started = Instant::now();
        let mut did_work = false;
        loop {
            let feedback = self.executor.execute(service).await.map_err(|source| {
                SchedulerError::Service {
                    service: service.name().to_string(),
                    source,
                }
            })?;
            did_work |= feedback.did_work();

            if !feedback.wants_more() || self.is_stopped() {
                break;
            }
            if started.elapsed() >= self.settings.stay_window {
                debug!(service = service.name(), "stay window elapsed, rotating");
                break;
            }
        }
        Ok(did_work)
    }

    async fn idle_wait(&self) {
        debug!(idle_wait = ?self.settings.idle_wait, "no service had work, waiting");
        tokio::select! {
            _ = tokio::time::sleep(self.settings.idle_wait) => {}
            _ = self.signals.abort_wait.notified() => {
                debug!("idle wait aborted");
            }
            _ = self.signals.stop.notified() => {}
        }
    }
}
