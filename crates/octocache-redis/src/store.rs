//! Redis distributed tier.

use async_trait::async_trait;
use deadpool_redis::Pool;
use octocache::{CacheError, CacheKey, DistributedStore, RawEntry};
use redis::AsyncCommands;
use time::OffsetDateTime;

use crate::envelope::Envelope;

/// [`DistributedStore`] on a Redis connection pool.
///
/// Entries are written with `SET EX` for their physical lifetime (stale
/// entries stay readable for fail-safe) and read back with `GET`.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Check that a connection can be obtained from the pool.
    pub async fn check_connection(&self) -> Result<(), CacheError> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::distributed(format!("failed to get Redis connection: {e}")))
    }
}

#[async_trait]
impl DistributedStore for RedisStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<RawEntry>, CacheError> {
        let mut conn = self.connection().await?;
        let bytes: Option<Vec<u8>> = conn
            .get(key.as_str())
            .await
            .map_err(|e| CacheError::distributed(format!("Redis GET failed: {e}")))?;

        let Some(bytes) = bytes else {
            return Ok(None);
        };
        match Envelope::decode(&bytes).and_then(Envelope::into_entry) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "discarding undecodable Redis entry");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, entry: &RawEntry) -> Result<(), CacheError> {
        let Some(remaining) = entry.remaining_physical(OffsetDateTime::now_utc()) else {
            return self.remove(key).await;
        };
        // EX takes whole seconds
        let ttl_secs = remaining.as_secs().max(1);
        let payload = Envelope::from_entry(entry).encode()?;

        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key.as_str(), payload, ttl_secs)
            .await
            .map_err(|e| CacheError::distributed(format!("Redis SET failed: {e}")))?;

        tracing::debug!(key = %key, ttl_secs, "stored entry in Redis");
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key.as_str())
            .await
            .map_err(|e| CacheError::distributed(format!("Redis DEL failed: {e}")))
    }
}
