//! Hybrid cache coordinator.
//!
//! ## Cache Hierarchy
//!
//! ```text
//! get / get_or_populate → L1 (local) → L2 (distributed) → factory
//!                            ↓               ↓               ↓
//!                       advisory copy    authoritative   one execution
//!                                                        per key at a time
//! ```
//!
//! Writes go to L2 first, then L1, then a backplane message tells the other
//! instances to drop their L1 copy.
//!
//! ## Graceful Degradation
//!
//! Without a distributed tier the cache runs L1-only. With one, L1 failures
//! are logged and treated as misses: L1 is an optimization, never a
//! correctness dependency.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::CacheResult;
use crate::backplane::{BackplaneMessage, LocalInvalidator};
use crate::codec;
use crate::config::OctocacheConfig;
use crate::context::PopulationContext;
use crate::entry::RawEntry;
use crate::error::{BoxError, CacheError};
use crate::key::{CacheKey, KeyNormalizer};
use crate::local::MemoryCache;
use crate::metrics;
use crate::options::{EntryOptions, EntryOverrides};
use crate::traits::{Backplane, DistributedStore, LocalStore, NoScope, ScopeFactory};

type PopulationFuture = Shared<BoxFuture<'static, Result<RawEntry, CacheError>>>;

struct InFlight {
    id: u64,
    future: PopulationFuture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PopulationMode {
    /// No fresh value: callers are waiting for the result.
    Miss,
    /// A fresh value exists; refresh it before it expires.
    EagerRefresh,
}

#[derive(Default)]
struct Lookup {
    fresh: Option<RawEntry>,
    stale: Option<RawEntry>,
    distributed_error: Option<CacheError>,
}

/// Two-tier cache with single-flight population and fail-safe.
///
/// Cheap to clone; clones share the same tiers and in-flight registry.
///
/// ```ignore
/// let cache = HybridCache::builder()
///     .with_distributed(Arc::new(redis_store))
///     .with_backplane(Arc::new(redis_backplane))
///     .build()
///     .await?;
///
/// let cancel = CancellationToken::new();
/// let user: User = cache
///     .get_or_populate("user:42", |_, _| async { load_user(42).await }, None, &cancel)
///     .await?;
/// ```
pub struct HybridCache<S: ScopeFactory = NoScope> {
    inner: Arc<Inner<S>>,
}

impl<S: ScopeFactory> Clone for HybridCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S: ScopeFactory> {
    instance_id: Uuid,
    normalizer: KeyNormalizer,
    default_options: EntryOptions,
    local: Arc<dyn LocalStore>,
    distributed: Option<Arc<dyn DistributedStore>>,
    backplane: Option<Arc<dyn Backplane>>,
    scopes: S,
    in_flight: DashMap<CacheKey, InFlight>,
    next_registration: AtomicU64,
    shutdown: CancellationToken,
}

/// Removes a population's in-flight registration when the population task
/// ends, including by panic.
struct Registration<S: ScopeFactory> {
    inner: Arc<Inner<S>>,
    key: CacheKey,
    id: u64,
}

impl<S: ScopeFactory> Drop for Registration<S> {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .remove_if(&self.key, |_, flight| flight.id == self.id);
    }
}

impl HybridCache<NoScope> {
    /// Create a new builder.
    pub fn builder() -> HybridCacheBuilder<NoScope> {
        HybridCacheBuilder::new()
    }
}

impl<S: ScopeFactory> HybridCache<S> {
    /// Store `value` under `key`.
    ///
    /// Uses the default entry options unless `overrides` supplies a duration
    /// or priority. Cancellation is checked before any store is touched; once
    /// the write has started it completes so that tiers stay consistent.
    ///
    /// A population of `key` already in flight still answers its waiters but
    /// no longer commits, so it cannot overwrite this value.
    ///
    /// # Errors
    ///
    /// - `InvalidKey` for an empty key, `Cancelled` for a cancelled token.
    /// - `Serialization` if the value cannot be encoded.
    /// - Distributed tier failures.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        overrides: EntryOverrides,
        cancel: &CancellationToken,
    ) -> CacheResult<()> {
        let key = self.prepare(key, cancel)?;
        let options = self.inner.default_options.clone().apply(&overrides);
        let entry = RawEntry::new(Arc::new(codec::encode(value)?), &options);

        self.inner.in_flight.remove(&key);
        self.inner.commit(&key, entry).await?;
        tracing::debug!(key = %key, duration_secs = options.duration.as_secs(), "cache set");
        Ok(())
    }

    /// Get the fresh value stored under `key`, or `None`.
    ///
    /// # Errors
    ///
    /// Never errors for a missing key. Fails for invalid keys, cancellation,
    /// undecodable values and distributed tier failures.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> CacheResult<Option<T>> {
        let key = self.prepare(key, cancel)?;
        let lookup = cancellable(cancel, async { Ok(self.inner.lookup(&key).await) }).await?;

        match (lookup.fresh, lookup.distributed_error) {
            (Some(entry), _) => codec::decode(&entry.value).map(Some),
            (None, Some(error)) => Err(error),
            (None, None) => Ok(None),
        }
    }

    /// Get the value stored under `key`, populating it with `factory` if there
    /// is no fresh value.
    ///
    /// Concurrent callers for the same key share a single factory execution.
    /// The factory runs in its own task with a fresh resource scope and can
    /// adjust the stored duration/priority through the [`PopulationContext`].
    /// `duration` overrides the default duration for this call.
    ///
    /// When the factory fails and fail-safe is enabled, a stale value (if any)
    /// is returned instead of the error. A hit on a value older than the
    /// eager-refresh threshold returns it and refreshes it in the background.
    ///
    /// Cancelling `cancel` abandons this caller's wait only; the shared
    /// population keeps running for the other callers.
    pub async fn get_or_populate<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        duration: Option<Duration>,
        cancel: &CancellationToken,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(Arc<S::Scope>, PopulationContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let key = self.prepare(key, cancel)?;
        let mut options = self.inner.default_options.clone();
        if let Some(duration) = duration {
            options.duration = duration;
        }

        let lookup = cancellable(cancel, async { Ok(self.inner.lookup(&key).await) }).await?;
        if let Some(error) = lookup.distributed_error {
            if !options.fail_safe {
                return Err(error);
            }
            tracing::warn!(
                key = %key,
                error = %error,
                "distributed tier unavailable, populating anyway"
            );
        }

        if let Some(entry) = lookup.fresh {
            if entry.needs_eager_refresh(options.eager_refresh_threshold, OffsetDateTime::now_utc())
                && !self.inner.in_flight.contains_key(&key)
            {
                tracing::debug!(key = %key, "eager refresh triggered");
                metrics::record_eager_refresh();
                let _ = Inner::join_or_start(
                    &self.inner,
                    key.clone(),
                    factory,
                    options,
                    Some(entry.clone()),
                    PopulationMode::EagerRefresh,
                );
            }
            return codec::decode(&entry.value);
        }

        let population = Inner::join_or_start(
            &self.inner,
            key,
            factory,
            options,
            lookup.stale,
            PopulationMode::Miss,
        );
        let entry = cancellable(cancel, population).await?;
        codec::decode(&entry.value)
    }

    /// Remove `key` from every tier and tell the other instances.
    ///
    /// Removing an absent key is not an error. A population of `key` already
    /// in flight still answers its waiters but no longer commits, and the
    /// next caller starts a fresh one.
    pub async fn remove(&self, key: &str, cancel: &CancellationToken) -> CacheResult<()> {
        let key = self.prepare(key, cancel)?;

        self.inner.in_flight.remove(&key);
        self.inner.evict_local(&key).await?;
        if let Some(distributed) = &self.inner.distributed {
            distributed.remove(&key).await?;
        }
        self.inner.publish(BackplaneMessage::remove(self.inner.instance_id, &key)).await;

        tracing::debug!(key = %key, "cache entry removed");
        Ok(())
    }

    /// Drop the local copy of `key` after another instance changed it.
    ///
    /// `key` is already normalized (it comes off the backplane). Idempotent;
    /// the next read goes to the distributed tier.
    pub async fn on_remote_invalidate(&self, key: &CacheKey) {
        if let Err(e) = self.inner.local.remove(key).await {
            tracing::warn!(key = %key, error = %e, "failed to evict remotely invalidated key");
        }
    }

    /// Evict every entry of this instance's local tier.
    pub async fn flush_local(&self) -> CacheResult<()> {
        self.inner.local.flush().await
    }

    /// Evict every entry of the local tier of this and every other instance.
    ///
    /// The distributed tier is left untouched.
    pub async fn broadcast_flush(&self) -> CacheResult<()> {
        self.inner.local.flush().await?;
        self.inner.publish(BackplaneMessage::clear(self.inner.instance_id)).await;
        tracing::info!(instance_id = %self.inner.instance_id, "local tiers flushed");
        Ok(())
    }

    /// Default options applied when a call does not override them.
    pub fn default_options(&self) -> EntryOptions {
        self.inner.default_options.clone()
    }

    /// Normalize an application key the way every operation does.
    pub fn normalize(&self, key: &str) -> CacheResult<CacheKey> {
        self.inner.normalizer.normalize(key)
    }

    /// Identifier of this instance on the backplane.
    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    /// Whether a distributed tier is configured.
    pub fn is_distributed(&self) -> bool {
        self.inner.distributed.is_some()
    }

    /// Number of populations currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Signal in-flight factories to stop (through their context's token).
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn prepare(&self, key: &str, cancel: &CancellationToken) -> Result<CacheKey, CacheError> {
        let key = self.inner.normalizer.normalize(key)?;
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        Ok(key)
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T, CacheError>>,
) -> Result<T, CacheError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CacheError::Cancelled),
        result = operation => result,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload");
    format!("population factory panicked: {detail}")
}

impl<S: ScopeFactory> Inner<S> {
    async fn lookup(&self, key: &CacheKey) -> Lookup {
        let now = OffsetDateTime::now_utc();
        let mut lookup = Lookup::default();

        match self.local.get(key).await {
            Ok(Some(entry)) if !entry.is_expired_at(now) => {
                tracing::debug!(key = %key, "cache hit (L1)");
                metrics::record_cache_hit("L1");
                lookup.fresh = Some(entry);
                return lookup;
            }
            Ok(Some(entry)) => lookup.stale = Some(entry),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "local tier GET error");
            }
        }

        if let Some(distributed) = &self.distributed {
            match distributed.get(key).await {
                Ok(Some(entry)) if !entry.is_expired_at(now) => {
                    tracing::debug!(key = %key, "cache hit (L2)");
                    metrics::record_cache_hit("L2");
                    if let Err(e) = self.local.insert(key, entry.clone()).await {
                        tracing::warn!(key = %key, error = %e, "failed to promote entry to L1");
                    }
                    lookup.fresh = Some(entry);
                    return lookup;
                }
                Ok(Some(entry)) => {
                    let newer = match &lookup.stale {
                        Some(local) => entry.created_at > local.created_at,
                        None => true,
                    };
                    if newer {
                        lookup.stale = Some(entry);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "distributed tier GET error");
                    lookup.distributed_error = Some(e);
                }
            }
        }

        tracing::debug!(key = %key, stale = lookup.stale.is_some(), "cache miss");
        metrics::record_cache_miss();
        lookup
    }

    /// Write an entry to every tier. Distributed failures propagate.
    async fn commit(&self, key: &CacheKey, entry: RawEntry) -> Result<(), CacheError> {
        if let Some(distributed) = &self.distributed {
            distributed.set(key, &entry).await?;
        }
        self.store_local(key, entry).await?;
        self.publish(BackplaneMessage::set(self.instance_id, key)).await;
        Ok(())
    }

    async fn store_local(&self, key: &CacheKey, entry: RawEntry) -> Result<(), CacheError> {
        match self.local.insert(key, entry).await {
            Ok(()) => Ok(()),
            Err(e) if self.distributed.is_some() => {
                tracing::warn!(key = %key, error = %e, "local tier SET error");
                // An older local copy must not shadow the new value.
                let _ = self.local.remove(key).await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn evict_local(&self, key: &CacheKey) -> Result<(), CacheError> {
        match self.local.remove(key).await {
            Ok(()) => Ok(()),
            Err(e) if self.distributed.is_some() => {
                tracing::warn!(key = %key, error = %e, "local tier DEL error");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn publish(&self, message: BackplaneMessage) {
        if let Some(backplane) = &self.backplane {
            if let Err(e) = backplane.publish(message).await {
                tracing::warn!(error = %e, "backplane PUBLISH error");
            }
        }
    }

    fn join_or_start<T, F, Fut, E>(
        self: &Arc<Self>,
        key: CacheKey,
        factory: F,
        options: EntryOptions,
        stale: Option<RawEntry>,
        mode: PopulationMode,
    ) -> PopulationFuture
    where
        T: Serialize + Send + 'static,
        F: FnOnce(Arc<S::Scope>, PopulationContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(slot) => {
                tracing::debug!(key = %key, "joining in-flight population");
                slot.get().future.clone()
            }
            Entry::Vacant(slot) => {
                let id = self.next_registration.fetch_add(1, Ordering::Relaxed);
                let registration = Registration {
                    inner: Arc::clone(self),
                    key: key.clone(),
                    id,
                };

                // The population runs in its own task so that it completes
                // even if every waiting caller goes away.
                let handle = tokio::spawn(async move {
                    registration
                        .inner
                        .populate(&registration.key, id, factory, options, stale, mode)
                        .await
                });

                let failed_key = key.clone();
                let future = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(CacheError::population(failed_key.as_str(), Box::new(e))),
                    }
                }
                .boxed()
                .shared();

                slot.insert(InFlight {
                    id,
                    future: future.clone(),
                });
                future
            }
        }
    }

    async fn populate<T, F, Fut, E>(
        &self,
        key: &CacheKey,
        id: u64,
        factory: F,
        options: EntryOptions,
        stale: Option<RawEntry>,
        mode: PopulationMode,
    ) -> Result<RawEntry, CacheError>
    where
        T: Serialize + Send + 'static,
        F: FnOnce(Arc<S::Scope>, PopulationContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        if mode == PopulationMode::Miss {
            // Another population may have committed between the caller's
            // lookup and this registration.
            if let Some(entry) = self.lookup(key).await.fresh {
                return Ok(entry);
            }
        }

        let ctx = PopulationContext::new(key.as_str(), self.shutdown.child_token());
        match self.run_factory(factory, ctx.clone()).await {
            Ok(value) => {
                metrics::record_population("success");
                let options = options.merge_pending(ctx.pending());
                let entry = RawEntry::new(Arc::new(codec::encode(&value)?), &options);
                if !self.owns_registration(key, id) {
                    tracing::debug!(
                        key = %key,
                        "key written or removed during population, not committing"
                    );
                    return Ok(entry);
                }
                self.commit_populated(key, &entry).await;
                tracing::debug!(
                    key = %key,
                    duration_secs = options.duration.as_secs(),
                    priority = ?options.priority,
                    "population committed"
                );
                Ok(entry)
            }
            Err(source) => {
                metrics::record_population("failure");
                match (mode, stale) {
                    (PopulationMode::EagerRefresh, Some(current)) => {
                        tracing::warn!(
                            key = %key,
                            error = %source,
                            "eager refresh failed, keeping current value"
                        );
                        Ok(current)
                    }
                    (PopulationMode::Miss, Some(stale)) if options.fail_safe => {
                        let throttled = stale.throttled(
                            options.fail_safe_throttle_duration,
                            OffsetDateTime::now_utc(),
                        );
                        if self.owns_registration(key, id) {
                            if let Err(e) = self.local.insert(key, throttled.clone()).await {
                                tracing::warn!(
                                    key = %key,
                                    error = %e,
                                    "failed to keep stale value in L1"
                                );
                            }
                        }
                        metrics::record_fail_safe();
                        tracing::warn!(
                            key = %key,
                            error = %source,
                            "population failed, serving stale value (fail-safe)"
                        );
                        Ok(throttled)
                    }
                    _ => {
                        tracing::warn!(key = %key, error = %source, "population failed");
                        Err(CacheError::population(key.as_str(), source))
                    }
                }
            }
        }
    }

    /// Commit a freshly produced value. The value is delivered to the
    /// waiters even if a tier rejects it, so failures are only logged here.
    async fn commit_populated(&self, key: &CacheKey, entry: &RawEntry) {
        if let Some(distributed) = &self.distributed {
            if let Err(e) = distributed.set(key, entry).await {
                tracing::warn!(key = %key, error = %e, "distributed tier SET error");
            }
        }
        if let Err(e) = self.local.insert(key, entry.clone()).await {
            tracing::warn!(key = %key, error = %e, "local tier SET error");
        }
        self.publish(BackplaneMessage::set(self.instance_id, key)).await;
    }

    /// Whether `id` still owns the in-flight slot of `key`. A `set` or
    /// `remove` issued while the population ran takes the slot away.
    fn owns_registration(&self, key: &CacheKey, id: u64) -> bool {
        self.in_flight.get(key).is_some_and(|slot| slot.id == id)
    }

    /// Run the factory inside a fresh scope.
    ///
    /// The scope is released whether the factory succeeds, fails or panics.
    async fn run_factory<T, F, Fut, E>(
        &self,
        factory: F,
        ctx: PopulationContext,
    ) -> Result<T, BoxError>
    where
        F: FnOnce(Arc<S::Scope>, PopulationContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let scope = match self.scopes.create().await {
            Ok(scope) => Arc::new(scope),
            Err(e) => {
                let message = format!("failed to create population scope: {e}");
                return Err(Box::new(CacheError::scope(message)));
            }
        };

        let handle = Arc::clone(&scope);
        let outcome = AssertUnwindSafe(async move { factory(handle, ctx).await })
            .catch_unwind()
            .await;

        match Arc::try_unwrap(scope) {
            Ok(scope) => self.scopes.release(scope).await,
            Err(_) => {
                tracing::warn!(
                    "population scope still referenced after the factory returned, \
                     dropping with its last handle"
                );
            }
        }

        match outcome {
            Ok(result) => result.map_err(Into::into),
            Err(panic) => Err(panic_message(panic.as_ref()).into()),
        }
    }
}

/// Builder for [`HybridCache`].
pub struct HybridCacheBuilder<S: ScopeFactory = NoScope> {
    local: Option<Arc<dyn LocalStore>>,
    distributed: Option<Arc<dyn DistributedStore>>,
    backplane: Option<Arc<dyn Backplane>>,
    normalizer: KeyNormalizer,
    default_options: EntryOptions,
    scopes: S,
}

impl HybridCacheBuilder<NoScope> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            local: None,
            distributed: None,
            backplane: None,
            normalizer: KeyNormalizer::new(),
            default_options: EntryOptions::default(),
            scopes: NoScope,
        }
    }

    /// Builder preconfigured from the `key_prefix`, `entry` and `local`
    /// sections. Tiers beyond the local one are added by the caller.
    pub fn from_config(config: &OctocacheConfig) -> Self {
        let mut builder = Self::new()
            .with_local(Arc::new(MemoryCache::new(config.local.max_capacity)))
            .with_default_options(config.entry_options());
        if let Some(prefix) = &config.key_prefix {
            builder = builder.with_key_prefix(prefix.clone());
        }
        builder
    }
}

impl Default for HybridCacheBuilder<NoScope> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ScopeFactory> HybridCacheBuilder<S> {
    /// Set the local tier (defaults to a [`MemoryCache`]).
    pub fn with_local(mut self, local: Arc<dyn LocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    /// Add a distributed tier.
    pub fn with_distributed(mut self, distributed: Arc<dyn DistributedStore>) -> Self {
        self.distributed = Some(distributed);
        self
    }

    /// Add a backplane.
    pub fn with_backplane(mut self, backplane: Arc<dyn Backplane>) -> Self {
        self.backplane = Some(backplane);
        self
    }

    /// Prefix every key with `prefix`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.normalizer = KeyNormalizer::with_prefix(prefix);
        self
    }

    /// Replace the default entry options.
    pub fn with_default_options(mut self, options: EntryOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Set the factory creating a resource scope per population.
    pub fn with_scope_factory<S2: ScopeFactory>(self, scopes: S2) -> HybridCacheBuilder<S2> {
        HybridCacheBuilder {
            local: self.local,
            distributed: self.distributed,
            backplane: self.backplane,
            normalizer: self.normalizer,
            default_options: self.default_options,
            scopes,
        }
    }

    /// Build the cache and subscribe its local tier to the backplane.
    ///
    /// # Errors
    ///
    /// Returns the backplane's error if subscribing fails.
    pub async fn build(self) -> CacheResult<HybridCache<S>> {
        let instance_id = Uuid::new_v4();
        let local = self
            .local
            .unwrap_or_else(|| Arc::new(MemoryCache::default()));

        if let Some(backplane) = &self.backplane {
            backplane
                .subscribe(Arc::new(LocalInvalidator::new(instance_id, Arc::clone(&local))))
                .await?;
        }

        tracing::info!(
            instance_id = %instance_id,
            distributed = self.distributed.is_some(),
            backplane = self.backplane.is_some(),
            prefix = self.normalizer.prefix().unwrap_or(""),
            "hybrid cache ready"
        );

        Ok(HybridCache {
            inner: Arc::new(Inner {
                instance_id,
                normalizer: self.normalizer,
                default_options: self.default_options,
                local,
                distributed: self.distributed,
                backplane: self.backplane,
                scopes: self.scopes,
                in_flight: DashMap::new(),
                next_registration: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheEntry;
    use crate::memory::MemoryDistributedStore;
    use std::sync::atomic::AtomicUsize;

    async fn cache_with_l2() -> (HybridCache, MemoryCache, MemoryDistributedStore) {
        let local = MemoryCache::default();
        let distributed = MemoryDistributedStore::new();
        let cache = HybridCache::builder()
            .with_local(Arc::new(local.clone()))
            .with_distributed(Arc::new(distributed.clone()))
            .build()
            .await
            .unwrap();
        (cache, local, distributed)
    }

    #[tokio::test]
    async fn test_set_writes_both_tiers() {
        let (cache, local, distributed) = cache_with_l2().await;
        let cancel = CancellationToken::new();

        cache
            .set("Greeting", &"hello", EntryOverrides::none(), &cancel)
            .await
            .unwrap();

        let key = cache.normalize("greeting").unwrap();
        assert!(LocalStore::get(&local, &key).await.unwrap().is_some());
        assert!(distributed.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_l2_hit_is_promoted() {
        let (cache, local, distributed) = cache_with_l2().await;
        let cancel = CancellationToken::new();
        let key = cache.normalize("k").unwrap();

        let entry = CacheEntry::new(
            Arc::new(codec::encode(&5_u32).unwrap()),
            &EntryOptions::default(),
        );
        distributed.set(&key, &entry).await.unwrap();

        assert_eq!(cache.get::<u32>("k", &cancel).await.unwrap(), Some(5));
        assert!(LocalStore::get(&local, &key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_entry_reads_as_absent() {
        let (cache, _, distributed) = cache_with_l2().await;
        let cancel = CancellationToken::new();
        let key = cache.normalize("k").unwrap();

        let entry = CacheEntry::new(
            Arc::new(codec::encode(&5_u32).unwrap()),
            &EntryOptions::default().with_duration(Duration::from_secs(1)),
        )
        .created_at(OffsetDateTime::now_utc() - Duration::from_secs(10));
        distributed.set(&key, &entry).await.unwrap();

        assert_eq!(cache.get::<u32>("k", &cancel).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_population_registration_is_released() {
        let (cache, _, _) = cache_with_l2().await;
        let cancel = CancellationToken::new();

        let value: String = cache
            .get_or_populate(
                "k",
                |_, _| async { Ok::<_, BoxError>("v".to_string()) },
                None,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(value, "v");
        assert_eq!(cache.in_flight(), 0);

        let err = cache
            .get_or_populate::<String, _, _, _>(
                "other",
                |_, _| async { Err::<String, BoxError>("boom".into()) },
                None,
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(err.is_population());
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_factory_surfaces_population_error() {
        let (cache, _, _) = cache_with_l2().await;
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let err = cache
            .get_or_populate::<u8, _, _, BoxError>(
                "p",
                move |_, _| async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("factory bug");
                    }
                    Ok(0)
                },
                None,
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(err.is_population());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
    }
}
