//! JSON implementation of `DataSerializer`.

use serde_json::Value;

use crate::domain::StorageError;
use crate::ports::DataSerializer;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl DataSerializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(value).map_err(StorageError::serialization)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, StorageError> {
        serde_json::from_slice(bytes).map_err(StorageError::serialization)
    }
}
