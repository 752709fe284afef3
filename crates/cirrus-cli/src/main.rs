use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, sleep};
use tracing::{error, info};

use cirrus_core::app::{HostBuilder, RuntimeConfig, SchedulerHandle};
use cirrus_core::domain::{HostExit, RestartReason, ServiceError};
use cirrus_core::impls::{
    BlobChangeTrigger, ExecutionStatsMonitor, InMemoryBlobTransport, InMemoryQueueTransport,
    JsonSerializer,
};
use cirrus_core::observability::init_tracing;
use cirrus_core::ports::{IdGenerator, SystemClock, UlidGenerator};
use cirrus_core::storage::{BlobStorageProvider, QueueStorageProvider};
use cirrus_core::worker::{
    MessageHandler, PeriodicJob, PeriodicService, QueueWorker, QueueWorkerSettings,
};

const GREETINGS: &str = "greetings";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Greeting {
    name: String,
    note: String,
}

/// Fails the first `n` messages to show abandon and redelivery.
struct GreetingHandler {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl MessageHandler<Greeting> for GreetingHandler {
    async fn handle(&self, greeting: Greeting) -> Result<(), ServiceError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(ServiceError::other(format!(
                "intentional failure (left={left})"
            )));
        }
        info!(name = %greeting.name, note_bytes = greeting.note.len(), "Hello!");
        Ok(())
    }
}

struct Heartbeat;

#[async_trait]
impl PeriodicJob for Heartbeat {
    async fn run_once(&self) -> Result<(), ServiceError> {
        info!("heartbeat");
        Ok(())
    }
}

/// Stops the host on Ctrl-C, or once the demo queue is drained.
async fn stop_when_done(queues: Arc<QueueStorageProvider>, handle: SchedulerHandle) {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping");
                break;
            }
            _ = sleep(Duration::from_secs(1)) => {
                let pending = queues.approximate_count(GREETINGS).await.unwrap_or(1);
                if pending == 0 && queues.checked_out_count() == 0 {
                    info!("demo queue drained, stopping");
                    break;
                }
            }
        }
    }
    handle.stop();
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(2);
        }
    };
    init_tracing(&config.log_filter);

    // (A) storage over in-memory transports
    let serializer = Arc::new(JsonSerializer);
    let blobs = Arc::new(BlobStorageProvider::new(
        Arc::new(InMemoryBlobTransport::new()),
        serializer.clone(),
    ));
    let queues = Arc::new(QueueStorageProvider::new(
        Arc::new(InMemoryQueueTransport::new()),
        blobs.clone(),
        serializer,
    ));
    let instance_id = UlidGenerator::new(SystemClock).generate_instance_id();

    // (B) some work, one message large enough to overflow into blob storage
    let greetings = [
        Greeting {
            name: "cirrus".to_string(),
            note: String::new(),
        },
        Greeting {
            name: "large".to_string(),
            note: "x".repeat(80 * 1024),
        },
    ];
    if let Err(err) = queues.put_range(GREETINGS, &greetings).await {
        error!(error = %err, "cannot enqueue demo messages");
        return ExitCode::FAILURE;
    }

    // (C) host
    let stats = Arc::new(ExecutionStatsMonitor::new());
    let host = HostBuilder::new()
        .with_config(config)
        .register_service(Arc::new(QueueWorker::new(
            "greeter",
            queues.clone(),
            GreetingHandler {
                remaining_failures: AtomicU32::new(1),
            },
            QueueWorkerSettings {
                batch_size: 8,
                ..QueueWorkerSettings::new(GREETINGS)
            },
        )))
        .and_then(|builder| {
            builder.register_service(Arc::new(PeriodicService::new(
                "heartbeat",
                instance_id.clone(),
                Duration::from_secs(30),
                blobs.clone(),
                Heartbeat,
            )))
        })
        .map(|builder| {
            builder
                .expect_services(&["greeter", "heartbeat"])
                .with_monitor(stats.clone())
                .with_diagnostics(stats.clone())
                .add_finalizer(queues.clone())
                .add_restart_trigger(Arc::new(BlobChangeTrigger::new(
                    blobs.clone(),
                    "cirrus-deploy",
                    "package",
                    RestartReason::NewCodeDetected,
                )))
        });
    let host = match host {
        Ok(builder) => builder.build(),
        Err(err) => {
            error!(error = %err, "cannot register services");
            return ExitCode::FAILURE;
        }
    };
    let host = match host {
        Ok(host) => host,
        Err(err) => {
            error!(error = %err, "cannot build runtime host");
            return ExitCode::FAILURE;
        }
    };

    // (D) run until stopped
    info!(instance = %instance_id, "starting");
    let stopper = tokio::spawn(stop_when_done(queues.clone(), host.handle()));
    let exit = host.run().await;
    stopper.abort();

    match exit {
        HostExit::Stopped => ExitCode::SUCCESS,
        HostExit::Restart(reason) => {
            info!(reason = ?reason, "restart requested");
            ExitCode::from(3)
        }
    }
}
