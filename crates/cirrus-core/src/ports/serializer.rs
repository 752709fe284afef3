//! DataSerializer port.
//!
//! The serializer works on the `serde_json::Value` intermediate
//! representation so it stays object-safe; conversions to and from concrete
//! types happen in `serialize_as` / `try_deserialize_as` and report type
//! mismatches as errors instead of panicking.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::StorageError;

pub trait DataSerializer: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, StorageError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, StorageError>;
}

/// Serialize a typed value through `serializer`.
pub fn serialize_as<T: Serialize + ?Sized>(
    serializer: &dyn DataSerializer,
    value: &T,
) -> Result<Vec<u8>, StorageError> {
    let value = serde_json::to_value(value).map_err(StorageError::serialization)?;
    serializer.serialize(&value)
}

/// Deserialize bytes as `T`; any mismatch is an `Err`, never a panic.
pub fn try_deserialize_as<T: DeserializeOwned>(
    serializer: &dyn DataSerializer,
    bytes: &[u8],
) -> Result<T, StorageError> {
    let value = serializer.deserialize(bytes)?;
    serde_json::from_value(value).map_err(StorageError::serialization)
}
