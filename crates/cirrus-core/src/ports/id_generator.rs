//! IdGenerator port.
//!
//! Names for overflow blobs, persisted message keys and host instances.
//! ULIDs sort by creation time, so listing a prefix returns blobs in the
//! order they were written.

use ulid::Ulid;

use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    /// Blob name for an overflowing message of `queue`: `"{queue}/{ulid}"`.
    fn generate_overflow_name(&self, queue: &str) -> String;

    /// Key of a persisted message inside its store.
    fn generate_persisted_key(&self) -> String;

    /// Identifier of a runtime host instance, used in logs and lease owners.
    fn generate_instance_id(&self) -> String;
}

/// ULID generator whose timestamp part comes from `clock`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_overflow_name(&self, queue: &str) -> String {
        format!("{queue}/{}", self.next())
    }

    fn generate_persisted_key(&self) -> String {
        self.next().to_string()
    }

    fn generate_instance_id(&self) -> String {
        format!("worker-{}", self.next().to_string().to_lowercase())
    }
}
