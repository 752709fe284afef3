//! Restart trigger watching a blob for changes.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{Etag, RestartReason};
use crate::ports::RestartTrigger;
use crate::storage::BlobStorageProvider;

/// Fires when the etag of `container/name` differs from the one seen on the
/// first check: a newly published package or configuration.
pub struct BlobChangeTrigger {
    blobs: Arc<BlobStorageProvider>,
    container: String,
    name: String,
    reason: RestartReason,
    baseline: Mutex<Option<Option<Etag>>>,
}

impl BlobChangeTrigger {
    pub fn new(
        blobs: Arc<BlobStorageProvider>,
        container: impl Into<String>,
        name: impl Into<String>,
        reason: RestartReason,
    ) -> Self {
        Self {
            blobs,
            container: container.into(),
            name: name.into(),
            reason,
            baseline: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RestartTrigger for BlobChangeTrigger {
    async fn check(&self) -> Option<RestartReason> {
        let current = match self.blobs.get_blob_etag(&self.container, &self.name).await {
            Ok(current) => current,
            Err(err) => {
                warn!(container = %self.container, name = %self.name, error = %err, "cannot check for changes");
                return None;
            }
        };

        let mut baseline = self.baseline.lock().unwrap_or_else(PoisonError::into_inner);
        match baseline.as_ref() {
            None => {
                *baseline = Some(current);
                None
            }
            Some(seen) if *seen == current => None,
            Some(_) => {
                info!(container = %self.container, name = %self.name, "watched blob changed");
                *baseline = Some(current);
                Some(self.reason.clone())
            }
        }
    }
}
