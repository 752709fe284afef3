//! RuntimeHost - drives the scheduler for the life of a worker process.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::scheduler::{Scheduler, SchedulerError, SchedulerHandle};
use crate::domain::{HostExit, RestartReason};
use crate::ports::{DiagnosticsSink, Finalizer, RestartTrigger};

/// Created by [`HostBuilder`](super::HostBuilder).
pub struct RuntimeHost {
    scheduler: Scheduler,
    restart_poll_interval: Duration,
    diagnostics: Vec<Arc<dyn DiagnosticsSink>>,
    finalizers: Vec<Arc<dyn Finalizer>>,
    triggers: Vec<Arc<dyn RestartTrigger>>,
}

impl RuntimeHost {
    pub(crate) fn new(
        scheduler: Scheduler,
        restart_poll_interval: Duration,
        diagnostics: Vec<Arc<dyn DiagnosticsSink>>,
        finalizers: Vec<Arc<dyn Finalizer>>,
        triggers: Vec<Arc<dyn RestartTrigger>>,
    ) -> Self {
        Self {
            scheduler,
            restart_poll_interval,
            diagnostics,
            finalizers,
            triggers,
        }
    }

    /// Stops the host after the current invocation.
    pub fn handle(&self) -> SchedulerHandle {
        self.scheduler.handle()
    }

    /// Runs until stopped, until a restart trigger fires, or until a service
    /// fails. Diagnostics are flushed and finalizers run on every path.
    pub async fn run(self) -> HostExit {
        let RuntimeHost {
            scheduler,
            restart_poll_interval,
            diagnostics,
            finalizers,
            triggers,
        } = self;

        let watcher = (!triggers.is_empty()).then(|| {
            tokio::spawn(watch_triggers(
                triggers,
                restart_poll_interval,
                scheduler.handle(),
            ))
        });

        info!("runtime host started");
        let result = scheduler.run().await;
        let fired = stop_watcher(watcher).await;

        flush(&diagnostics).await;
        finalize(&finalizers).await;

        let exit = match result {
            Err(SchedulerError::Service { service, source }) => {
                error!(service = %service, error = %source, "service failed, requesting restart");
                HostExit::Restart(RestartReason::ServiceFailure {
                    service,
                    error: source.to_string(),
                })
            }
            Ok(()) => match fired {
                Some(reason) => HostExit::Restart(reason),
                None => HostExit::Stopped,
            },
        };
        info!(exit = ?exit, "runtime host exited");
        exit
    }
}

async fn watch_triggers(
    triggers: Vec<Arc<dyn RestartTrigger>>,
    interval: Duration,
    handle: SchedulerHandle,
) -> RestartReason {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        for trigger in &triggers {
            if let Some(reason) = trigger.check().await {
                info!(reason = ?reason, "restart requested");
                handle.stop();
                return reason;
            }
        }
    }
}

/// The reason the watcher fired, if it did.
async fn stop_watcher(watcher: Option<JoinHandle<RestartReason>>) -> Option<RestartReason> {
    let watcher = watcher?;
    watcher.abort();
    // A watcher that already returned keeps its result through abort.
    match watcher.await {
        Ok(reason) => Some(reason),
        Err(err) if err.is_panic() => {
            error!(error = %err, "restart trigger watcher panicked");
            None
        }
        Err(_) => None,
    }
}

async fn flush(sinks: &[Arc<dyn DiagnosticsSink>]) {
    for sink in sinks {
        if let Err(err) = sink.flush().await {
            warn!(error = %err, "diagnostics flush failed");
        }
    }
}

async fn finalize(finalizers: &[Arc<dyn Finalizer>]) {
    for finalizer in finalizers {
        match finalizer.finalize().await {
            Ok(()) => info!(finalizer = finalizer.name(), "finalized"),
            Err(err) => warn!(finalizer = finalizer.name(), error = %err, "finalizer failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::HostBuilder;
    use crate::app::registry::tests::Constant;
    use crate::domain::{ServiceError, ServiceFeedback};
    use crate::ports::{MonitorError, WorkerService};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        journal: Journal,
        fail: bool,
    }

    impl Recorder {
        fn new(name: &'static str, journal: &Journal) -> Arc<Self> {
            Arc::new(Self {
                name,
                journal: journal.clone(),
                fail: false,
            })
        }

        fn failing(name: &'static str, journal: &Journal) -> Arc<Self> {
            Arc::new(Self {
                name,
                journal: journal.clone(),
                fail: true,
            })
        }

        fn record(&self, what: &str) -> Result<(), MonitorError> {
            self.journal.lock().unwrap().push(format!("{what}:{}", self.name));
            if self.fail {
                Err(MonitorError("nope".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Finalizer for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn finalize(&self) -> Result<(), MonitorError> {
            self.record("finalize")
        }
    }

    #[async_trait]
    impl DiagnosticsSink for Recorder {
        async fn flush(&self) -> Result<(), MonitorError> {
            self.record("flush")
        }
    }

    /// Fires on its n-th check.
    struct FireOn {
        nth: usize,
        checks: AtomicUsize,
    }

    #[async_trait]
    impl RestartTrigger for FireOn {
        async fn check(&self) -> Option<RestartReason> {
            let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            (n >= self.nth).then_some(RestartReason::NewCodeDetected)
        }
    }

    struct Panicking;

    #[async_trait]
    impl RestartTrigger for Panicking {
        async fn check(&self) -> Option<RestartReason> {
            panic!("trigger blew up");
        }
    }

    struct Broken;

    #[async_trait]
    impl WorkerService for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn run(&self) -> Result<ServiceFeedback, ServiceError> {
            Err(ServiceError::other("disk on fire"))
        }
    }

    fn builder(journal: &Journal) -> HostBuilder {
        HostBuilder::new()
            .register_service(Arc::new(Constant("idle", ServiceFeedback::Skipped)))
            .unwrap()
            .with_diagnostics(Recorder::new("stats", journal))
            .add_finalizer(Recorder::failing("leases", journal))
            .add_finalizer(Recorder::new("queues", journal))
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn stop_exits_normally_after_cleanup() {
        let journal = Journal::default();
        let host = builder(&journal).build().unwrap();
        let handle = host.handle();

        let (exit, ()) = tokio::join!(host.run(), async {
            tokio::time::sleep(Duration::from_secs(25)).await;
            handle.stop();
        });

        assert_eq!(exit, HostExit::Stopped);
        // A failing finalizer does not keep the next one from running.
        assert_eq!(
            entries(&journal),
            vec!["flush:stats", "finalize:leases", "finalize:queues"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fired_trigger_requests_a_restart() {
        let journal = Journal::default();
        let trigger = Arc::new(FireOn {
            nth: 2,
            checks: AtomicUsize::new(0),
        });
        let host = builder(&journal)
            .add_restart_trigger(trigger.clone())
            .build()
            .unwrap();
        let started = tokio::time::Instant::now();

        let exit = host.run().await;

        assert_eq!(exit, HostExit::Restart(RestartReason::NewCodeDetected));
        assert_eq!(trigger.checks.load(Ordering::SeqCst), 2);
        // Second poll happens one default interval after the first.
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(entries(&journal).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn panicked_watcher_does_not_request_a_restart() {
        let journal = Journal::default();
        let host = builder(&journal)
            .add_restart_trigger(Arc::new(Panicking))
            .build()
            .unwrap();
        let handle = host.handle();

        let (exit, ()) = tokio::join!(host.run(), async {
            tokio::time::sleep(Duration::from_secs(45)).await;
            handle.stop();
        });

        assert_eq!(exit, HostExit::Stopped);
        assert_eq!(
            entries(&journal),
            vec!["flush:stats", "finalize:leases", "finalize:queues"]
        );
    }

    #[tokio::test]
    async fn service_failure_becomes_a_restart_reason() {
        let journal = Journal::default();
        let host = builder(&journal)
            .register_service(Arc::new(Broken))
            .unwrap()
            .build()
            .unwrap();

        let exit = host.run().await;

        assert_eq!(
            exit,
            HostExit::Restart(RestartReason::ServiceFailure {
                service: "broken".to_string(),
                error: "disk on fire".to_string(),
            })
        );
        assert_eq!(
            entries(&journal),
            vec!["flush:stats", "finalize:leases", "finalize:queues"]
        );
    }
}
