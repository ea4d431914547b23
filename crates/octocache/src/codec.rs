//! MessagePack encoding of cached values.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CacheError;

/// Encode a value for storage.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CacheError> {
    rmp_serde::to_vec_named(value).map_err(|e| CacheError::serialization(e.to_string()))
}

/// Decode a stored value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
    rmp_serde::from_slice(bytes).map_err(|e| CacheError::serialization(e.to_string()))
}
