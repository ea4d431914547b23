//! In-process expiring store backed by moka.
//!
//! [`MemoryCache`] is usable on its own through its typed API
//! (`get_or_create`, `exists`, `remove`, `flush`) and is the default local tier
//! of the hybrid cache through [`LocalStore`].

use std::any::{Any, type_name};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use time::OffsetDateTime;

use crate::entry::RawEntry;
use crate::error::CacheError;
use crate::key::{CacheKey, KeyNormalizer};
use crate::options::Priority;
use crate::traits::LocalStore;

/// Default capacity, counted in normal-priority entries.
pub const DEFAULT_LOCAL_CAPACITY: u64 = 10_000;

/// Per-entry expiration in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Expire a fixed time after insertion.
    Absolute(Duration),
    /// Expire after a period without reads.
    Sliding(Duration),
}

impl Expiration {
    fn duration(self) -> Duration {
        match self {
            Self::Absolute(d) | Self::Sliding(d) => d,
        }
    }
}

#[derive(Clone)]
struct Slot {
    value: Arc<dyn Any + Send + Sync>,
    expiration: Option<Expiration>,
    priority: Priority,
}

struct SlotExpiry;

impl Expiry<String, Slot> for SlotExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        slot: &Slot,
        _created_at: Instant,
    ) -> Option<Duration> {
        slot.expiration.map(Expiration::duration)
    }

    fn expire_after_read(
        &self,
        _key: &String,
        slot: &Slot,
        _read_at: Instant,
        duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        match slot.expiration {
            Some(Expiration::Sliding(d)) => Some(d),
            _ => duration_until_expiry,
        }
    }

    fn expire_after_update(
        &self,
        _key: &String,
        slot: &Slot,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        slot.expiration.map(Expiration::duration)
    }
}

// Lower priorities weigh more, so they use up capacity faster and are the
// first to go under pressure. `NeverRemove` weighs nothing.
fn priority_weight(priority: Priority) -> u32 {
    match priority {
        Priority::Low => 4,
        Priority::Normal => 2,
        Priority::High => 1,
        Priority::NeverRemove => 0,
    }
}

/// Local in-memory cache.
///
/// Thread-safe and cheap to clone; clones share the same storage.
#[derive(Clone)]
pub struct MemoryCache {
    cache: Cache<String, Slot>,
    normalizer: KeyNormalizer,
}

impl MemoryCache {
    /// Create a cache holding roughly `capacity` normal-priority entries.
    pub fn new(capacity: u64) -> Self {
        Self::with_normalizer(capacity, KeyNormalizer::new())
    }

    /// Create a cache that normalizes typed-API keys with `normalizer`.
    pub fn with_normalizer(capacity: u64, normalizer: KeyNormalizer) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity.saturating_mul(u64::from(priority_weight(Priority::Normal))))
            .weigher(|_key: &String, slot: &Slot| priority_weight(slot.priority))
            .expire_after(SlotExpiry)
            .build();

        Self { cache, normalizer }
    }

    /// Return the value stored under `key`, creating it with `factory` if
    /// absent.
    ///
    /// Concurrent callers for the same absent key share one factory call.
    ///
    /// # Errors
    ///
    /// - `InvalidKey` for an empty key.
    /// - `NullResult` if the factory yields `None`.
    /// - `TypeMismatch` if the stored value is not a `T`.
    pub async fn get_or_create<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        expiration: Option<Expiration>,
    ) -> Result<T, CacheError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let key = self.normalizer.normalize(key)?;

        let slot = self
            .cache
            .optionally_get_with(key.as_str().to_owned(), async move {
                factory().await.map(|value| {
                    let value: Arc<dyn Any + Send + Sync> = Arc::new(value);
                    Slot {
                        value,
                        expiration,
                        priority: Priority::Normal,
                    }
                })
            })
            .await
            .ok_or_else(|| CacheError::null_result(key.as_str()))?;

        downcast::<T>(&key, slot).map(|value| (*value).clone())
    }

    /// Whether `key` is present. Does not count as a read.
    pub fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let key = self.normalizer.normalize(key)?;
        Ok(self.cache.contains_key(key.as_str()))
    }

    /// Remove `key`. Removing an absent key is a no-op.
    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let key = self.normalizer.normalize(key)?;
        self.cache.invalidate(key.as_str()).await;
        Ok(())
    }

    /// Evict every entry.
    pub async fn flush(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        tracing::debug!("local cache flushed");
    }

    /// Approximate number of entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_CAPACITY)
    }
}

fn downcast<T: Send + Sync + 'static>(
    key: &CacheKey,
    slot: Slot,
) -> Result<Arc<T>, CacheError> {
    slot.value
        .downcast::<T>()
        .map_err(|_| CacheError::TypeMismatch {
            key: key.to_string(),
            expected: type_name::<T>(),
        })
}

#[async_trait]
impl LocalStore for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<RawEntry>, CacheError> {
        let Some(slot) = self.cache.get(key.as_str()).await else {
            return Ok(None);
        };
        let entry = downcast::<RawEntry>(key, slot)?;
        if entry.remaining_physical(OffsetDateTime::now_utc()).is_none() {
            return Ok(None);
        }
        Ok(Some(RawEntry::clone(&entry)))
    }

    async fn insert(&self, key: &CacheKey, entry: RawEntry) -> Result<(), CacheError> {
        let Some(remaining) = entry.remaining_physical(OffsetDateTime::now_utc()) else {
            self.cache.invalidate(key.as_str()).await;
            return Ok(());
        };

        let priority = entry.priority;
        let value: Arc<dyn Any + Send + Sync> = Arc::new(entry);
        let slot = Slot {
            value,
            expiration: Some(Expiration::Absolute(remaining)),
            priority,
        };
        self.cache.insert(key.as_str().to_owned(), slot).await;
        Ok(())
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.cache.contains_key(key.as_str()))
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.cache.invalidate(key.as_str()).await;
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        MemoryCache::flush(self).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheEntry;
    use crate::options::EntryOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_get_or_create_runs_factory_once() {
        let cache = MemoryCache::default();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_create(
                    "answer",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Some(42_u32)
                    },
                    None,
                )
                .await
                .unwrap();
            assert_eq!(value, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_create_concurrent_callers_share_factory() {
        let cache = MemoryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks = (0..8).map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            async move {
                cache
                    .get_or_create(
                        "shared",
                        || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Some("value".to_string())
                        },
                        None,
                    )
                    .await
            }
        });

        let results = futures::future::join_all(tasks).await;
        assert!(results.iter().all(|r| matches!(r.as_deref(), Ok("value"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_null_result_is_surfaced() {
        let cache = MemoryCache::default();
        let err = cache
            .get_or_create::<String, _, _>("missing", || async { None }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NullResult { .. }));
        assert!(!cache.exists("missing").unwrap());
    }

    #[tokio::test]
    async fn test_keys_are_case_insensitive() {
        let cache = MemoryCache::default();
        cache
            .get_or_create("Key", || async { Some(1_i32) }, None)
            .await
            .unwrap();
        assert!(cache.exists("KEY").unwrap());
        assert!(cache.exists("key").unwrap());
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let cache = MemoryCache::default();
        cache
            .get_or_create("k", || async { Some(1_i32) }, None)
            .await
            .unwrap();
        let err = cache
            .get_or_create("k", || async { Some("text".to_string()) }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_absolute_expiration() {
        let cache = MemoryCache::default();
        cache
            .get_or_create(
                "short",
                || async { Some(1_u8) },
                Some(Expiration::Absolute(Duration::from_millis(50))),
            )
            .await
            .unwrap();
        assert!(cache.exists("short").unwrap());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!cache.exists("short").unwrap());
    }

    #[tokio::test]
    async fn test_sliding_expiration_extends_on_read() {
        let cache = MemoryCache::default();
        cache
            .get_or_create(
                "slide",
                || async { Some(1_u8) },
                Some(Expiration::Sliding(Duration::from_millis(150))),
            )
            .await
            .unwrap();

        // Each read lands before the window closes and pushes it forward.
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(80)).await;
            let value = cache
                .get_or_create("slide", || async { Some(2_u8) }, None)
                .await
                .unwrap();
            assert_eq!(value, 1);
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!cache.exists("slide").unwrap());
    }

    async fn fill(cache: &MemoryCache, prefix: &str, count: u8, priority: Priority) {
        let normalizer = KeyNormalizer::new();
        let options = EntryOptions::default().with_priority(priority);
        for i in 0..count {
            let key = normalizer.normalize(&format!("{prefix}{i}")).unwrap();
            let entry: RawEntry = CacheEntry::new(Arc::new(vec![i]), &options);
            LocalStore::insert(cache, &key, entry).await.unwrap();
        }
        cache.cache.run_pending_tasks().await;
    }

    #[test]
    fn test_priority_weights_are_ordered() {
        assert!(priority_weight(Priority::Low) > priority_weight(Priority::Normal));
        assert!(priority_weight(Priority::Normal) > priority_weight(Priority::High));
        assert_eq!(priority_weight(Priority::NeverRemove), 0);
    }

    #[tokio::test]
    async fn test_never_remove_entries_do_not_use_capacity() {
        let cache = MemoryCache::new(2);
        fill(&cache, "pinned", 10, Priority::NeverRemove).await;

        assert_eq!(cache.cache.weighted_size(), 0);
        assert_eq!(cache.entry_count(), 10);
    }

    #[tokio::test]
    async fn test_low_priority_entries_use_capacity_faster() {
        // Room for 8 weight units.
        let high = MemoryCache::new(4);
        fill(&high, "high", 6, Priority::High).await;
        assert_eq!(high.entry_count(), 6);

        let low = MemoryCache::new(4);
        fill(&low, "low", 10, Priority::Low).await;
        assert!(low.entry_count() <= 2, "kept {} low entries", low.entry_count());
        assert!(low.cache.weighted_size() <= 8);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let cache = MemoryCache::default();
        cache.remove("never-set").await.unwrap();

        cache
            .get_or_create("k", || async { Some(1_u8) }, None)
            .await
            .unwrap();
        cache.remove("k").await.unwrap();
        cache.remove("k").await.unwrap();
        assert!(!cache.exists("k").unwrap());
    }

    #[tokio::test]
    async fn test_flush_evicts_everything() {
        let cache = MemoryCache::default();
        for i in 0..5 {
            cache
                .get_or_create(&format!("k{i}"), || async move { Some(i) }, None)
                .await
                .unwrap();
        }

        cache.flush().await;
        for i in 0..5 {
            let value = cache
                .get_or_create(&format!("k{i}"), || async { Some(100) }, None)
                .await
                .unwrap();
            assert_eq!(value, 100, "k{i} should have been recreated");
        }
    }

    #[tokio::test]
    async fn test_rejects_blank_key() {
        let cache = MemoryCache::default();
        let err = cache
            .get_or_create("  ", || async { Some(1_u8) }, None)
            .await
            .unwrap_err();
        assert!(err.is_invalid_key());
        assert!(cache.remove("").await.unwrap_err().is_invalid_key());
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let cache = MemoryCache::default();
        let key = KeyNormalizer::new().normalize("raw").unwrap();
        let entry: RawEntry = CacheEntry::new(Arc::new(vec![1, 2, 3]), &EntryOptions::default());

        LocalStore::insert(&cache, &key, entry.clone()).await.unwrap();
        let stored = LocalStore::get(&cache, &key).await.unwrap().unwrap();
        assert_eq!(stored.value, entry.value);
        assert!(LocalStore::exists(&cache, &key).await.unwrap());

        LocalStore::remove(&cache, &key).await.unwrap();
        assert!(LocalStore::get(&cache, &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_store_skips_physically_expired_entry() {
        let cache = MemoryCache::default();
        let key = KeyNormalizer::new().normalize("old").unwrap();
        let options = EntryOptions::default()
            .with_duration(Duration::from_secs(1))
            .with_fail_safe(false);
        let entry: RawEntry = CacheEntry::new(Arc::new(vec![1]), &options)
            .created_at(OffsetDateTime::now_utc() - Duration::from_secs(10));

        LocalStore::insert(&cache, &key, entry).await.unwrap();
        assert!(LocalStore::get(&cache, &key).await.unwrap().is_none());
    }
}
