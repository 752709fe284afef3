//! Logical storage providers built on the raw transports.

pub mod blob;
pub mod queue;

pub use self::blob::{BlobStorageProvider, MD5_METADATA_KEY};
pub use self::queue::{
    MAX_RAW_MESSAGE_SIZE, OVERFLOW_CONTAINER, PERSISTED_CONTAINER, POISON_STORE,
    QueueStorageProvider,
};
