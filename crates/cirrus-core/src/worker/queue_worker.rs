//! QueueWorker - a worker service that drains one queue.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::handler::MessageHandler;
use crate::domain::{ServiceError, ServiceFeedback};
use crate::ports::WorkerService;
use crate::storage::QueueStorageProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueWorkerSettings {
    pub queue: String,
    /// Messages fetched per turn.
    pub batch_size: usize,
    /// How long fetched messages stay hidden from other workers.
    pub visibility_timeout: Duration,
    /// Deliveries allowed before a message is quarantined.
    pub max_processing_trials: u32,
}

impl QueueWorkerSettings {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            batch_size: 1,
            visibility_timeout: Duration::from_secs(30 * 60),
            max_processing_trials: 5,
        }
    }
}

/// Each turn takes one batch: handled messages are deleted, failed ones
/// abandoned. Reports `WorkAvailable` after a full batch, since more are
/// likely waiting.
pub struct QueueWorker<T, H> {
    name: String,
    queues: Arc<QueueStorageProvider>,
    handler: H,
    settings: QueueWorkerSettings,
    _marker: PhantomData<fn() -> T>,
}

impl<T, H> QueueWorker<T, H>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    H: MessageHandler<T>,
{
    pub fn new(
        name: impl Into<String>,
        queues: Arc<QueueStorageProvider>,
        handler: H,
        settings: QueueWorkerSettings,
    ) -> Self {
        Self {
            name: name.into(),
            queues,
            handler,
            settings,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, H> WorkerService for QueueWorker<T, H>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    H: MessageHandler<T>,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<ServiceFeedback, ServiceError> {
        let settings = &self.settings;
        let batch: Vec<T> = self
            .queues
            .get(
                &settings.queue,
                settings.batch_size,
                settings.visibility_timeout,
                settings.max_processing_trials,
            )
            .await?;
        if batch.is_empty() {
            return Ok(ServiceFeedback::Skipped);
        }

        let full = batch.len() >= settings.batch_size;
        for message in batch {
            match self.handler.handle(message.clone()).await {
                Ok(()) => {
                    self.queues.delete(&message).await?;
                }
                Err(err) => {
                    warn!(service = %self.name, queue = %settings.queue, error = %err, "handler failed, abandoning message");
                    self.queues.abandon(&message).await?;
                }
            }
        }
        debug!(service = %self.name, full, "batch done");

        Ok(if full {
            ServiceFeedback::WorkAvailable
        } else {
            ServiceFeedback::DontCare
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::POISON_STORE;
    use crate::storage::queue::tests::{Job, fixture, job};
    use std::sync::Mutex;

    /// Records every id it sees; fails the ones listed.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<u32>>,
        failing: Vec<u32>,
    }

    #[async_trait]
    impl MessageHandler<Job> for Arc<Recording> {
        async fn handle(&self, message: Job) -> Result<(), ServiceError> {
            self.seen.lock().unwrap().push(message.id);
            if self.failing.contains(&message.id) {
                return Err(ServiceError::other(format!("cannot handle {}", message.id)));
            }
            Ok(())
        }
    }

    fn settings(batch_size: usize, max_processing_trials: u32) -> QueueWorkerSettings {
        QueueWorkerSettings {
            batch_size,
            max_processing_trials,
            ..QueueWorkerSettings::new("jobs")
        }
    }

    #[tokio::test]
    async fn empty_queue_is_skipped() {
        let f = fixture();
        let worker = QueueWorker::new(
            "jobs-worker",
            Arc::new(f.provider),
            Arc::new(Recording::default()),
            settings(4, 5),
        );
        assert_eq!(worker.run().await.unwrap(), ServiceFeedback::Skipped);
    }

    #[tokio::test]
    async fn full_batches_ask_for_more() {
        let f = fixture();
        f.provider.put_range("jobs", &[job(1), job(2), job(3)]).await.unwrap();
        let handler = Arc::new(Recording::default());
        let worker = QueueWorker::new("jobs-worker", Arc::new(f.provider), handler.clone(), settings(2, 5));

        assert_eq!(worker.run().await.unwrap(), ServiceFeedback::WorkAvailable);
        assert_eq!(f.queues.len("jobs"), 1);
        assert_eq!(worker.run().await.unwrap(), ServiceFeedback::DontCare);
        assert_eq!(worker.run().await.unwrap(), ServiceFeedback::Skipped);

        assert_eq!(*handler.seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(f.queues.len("jobs"), 0);
    }

    #[tokio::test]
    async fn runs_as_a_scheduled_service() {
        let f = fixture();
        f.provider.put("jobs", &job(3)).await.unwrap();
        let handler = Arc::new(Recording::default());
        let service: Arc<dyn WorkerService> = Arc::new(QueueWorker::new(
            "jobs-worker",
            Arc::new(f.provider),
            handler.clone(),
            settings(4, 5),
        ));

        let turn = tokio::spawn(async move { service.run().await });
        assert_eq!(turn.await.unwrap().unwrap(), ServiceFeedback::DontCare);
        assert_eq!(*handler.seen.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn failures_are_retried_then_quarantined() {
        let f = fixture();
        f.provider.put("jobs", &job(7)).await.unwrap();
        let handler = Arc::new(Recording {
            failing: vec![7],
            ..Recording::default()
        });
        let queues = Arc::new(f.provider);
        let worker = QueueWorker::new("jobs-worker", queues.clone(), handler.clone(), settings(1, 2));

        assert_eq!(worker.run().await.unwrap(), ServiceFeedback::WorkAvailable);
        assert_eq!(worker.run().await.unwrap(), ServiceFeedback::WorkAvailable);
        // Third delivery exceeds the trial limit.
        assert_eq!(worker.run().await.unwrap(), ServiceFeedback::Skipped);

        assert_eq!(*handler.seen.lock().unwrap(), vec![7, 7]);
        assert_eq!(queues.list_persisted(POISON_STORE).await.unwrap().len(), 1);
        assert_eq!(queues.checked_out_count(), 0);
    }
}
