//! Wire format of entries stored in Redis.

use std::sync::Arc;
use std::time::Duration;

use octocache::{CacheError, Priority, RawEntry, codec};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// MessagePack envelope around an encoded value and its metadata.
///
/// Timestamps are unix milliseconds so that instances with different clocks
/// resolution agree on freshness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub value: Vec<u8>,
    pub created_at_ms: i64,
    pub duration_ms: u64,
    pub physical_duration_ms: u64,
    pub priority: Priority,
    pub fail_safe: bool,
}

impl Envelope {
    pub fn from_entry(entry: &RawEntry) -> Self {
        Self {
            value: entry.value.as_ref().clone(),
            created_at_ms: (entry.created_at.unix_timestamp_nanos() / 1_000_000) as i64,
            duration_ms: entry.duration.as_millis() as u64,
            physical_duration_ms: entry.physical_duration.as_millis() as u64,
            priority: entry.priority,
            fail_safe: entry.fail_safe,
        }
    }

    pub fn into_entry(self) -> Result<RawEntry, CacheError> {
        let created_at =
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.created_at_ms) * 1_000_000)
                .map_err(|e| CacheError::serialization(format!("invalid entry timestamp: {e}")))?;

        Ok(RawEntry {
            value: Arc::new(self.value),
            created_at,
            duration: Duration::from_millis(self.duration_ms),
            physical_duration: Duration::from_millis(self.physical_duration_ms),
            priority: self.priority,
            fail_safe: self.fail_safe,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        codec::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        codec::decode(bytes)
    }
}
