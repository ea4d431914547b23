//! Redis distributed tier and backplane for octocache.
//!
//! ```ignore
//! let config = octocache::load_config(None)?;
//! let cache = octocache_redis::create_hybrid_cache(&config).await?;
//! ```

pub mod envelope;
pub mod pubsub;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::Pool;
use octocache::config::RedisConfig;
use octocache::{CacheError, HybridCache, HybridCacheBuilder, OctocacheConfig};

pub use envelope::Envelope;
pub use pubsub::RedisBackplane;
pub use store::RedisStore;

/// Create a Redis connection pool from configuration.
pub fn create_pool(config: &RedisConfig) -> Result<Pool, CacheError> {
    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Some(Duration::from_millis(config.timeout_ms));
    let pool_config = redis_config
        .pool
        .get_or_insert_with(|| deadpool_redis::PoolConfig::new(config.pool_size));
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = timeout;
    pool_config.timeouts.create = timeout;
    pool_config.timeouts.recycle = timeout;

    redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| CacheError::distributed(format!("failed to create Redis pool: {e}")))
}

/// Create a hybrid cache from configuration.
///
/// Uses Redis as distributed tier and backplane when `redis.enabled` is set
/// and Redis is reachable. Otherwise falls back to a local-only cache.
pub async fn create_hybrid_cache(config: &OctocacheConfig) -> Result<HybridCache, CacheError> {
    config.validate().map_err(CacheError::configuration)?;
    let builder = HybridCacheBuilder::from_config(config);

    if !config.redis.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return builder.build().await;
    }

    tracing::info!(url = %config.redis.url, "Connecting to Redis");

    let pool = match create_pool(&config.redis) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create Redis pool. Falling back to local cache.");
            return builder.build().await;
        }
    };

    let store = RedisStore::new(pool.clone());
    if let Err(e) = store.check_connection().await {
        tracing::warn!(error = %e, "Failed to connect to Redis. Falling back to local cache.");
        return builder.build().await;
    }
    tracing::info!("Connected to Redis successfully");

    builder
        .with_distributed(Arc::new(store))
        .with_backplane(Arc::new(RedisBackplane::new(
            pool,
            config.redis.url.clone(),
            config.redis.channel.clone(),
        )))
        .build()
        .await
}
