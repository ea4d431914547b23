//! Collaborator traits.
//!
//! The coordinator only talks to its tiers, its backplane and its scope
//! factory through these traits. Implementations must be thread-safe.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backplane::BackplaneMessage;
use crate::entry::RawEntry;
use crate::error::CacheError;
use crate::key::CacheKey;

/// In-process tier. Advisory: the coordinator treats its failures as misses
/// whenever a distributed tier can answer instead.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Get an entry, fresh or stale. Returns `None` once physically expired.
    async fn get(&self, key: &CacheKey) -> Result<Option<RawEntry>, CacheError>;

    /// Insert or replace an entry. It is kept for its remaining physical
    /// lifetime.
    async fn insert(&self, key: &CacheKey, entry: RawEntry) -> Result<(), CacheError>;

    /// Whether an entry is present.
    async fn exists(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Remove an entry. Removing an absent key is a no-op.
    async fn remove(&self, key: &CacheKey) -> Result<(), CacheError>;

    /// Evict every entry.
    async fn flush(&self) -> Result<(), CacheError>;
}

/// Authoritative tier shared by every process.
#[async_trait]
pub trait DistributedStore: Send + Sync {
    /// Get an entry, fresh or stale.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing keys.
    async fn get(&self, key: &CacheKey) -> Result<Option<RawEntry>, CacheError>;

    /// Store an entry for its physical duration.
    async fn set(&self, key: &CacheKey, entry: &RawEntry) -> Result<(), CacheError>;

    /// Remove an entry. Removing an absent key is a no-op.
    async fn remove(&self, key: &CacheKey) -> Result<(), CacheError>;
}

/// Pub/sub channel that keeps local tiers of different processes coherent.
///
/// No ordering or delivery guarantee is assumed.
#[async_trait]
pub trait Backplane: Send + Sync {
    /// Notify the other instances.
    async fn publish(&self, message: BackplaneMessage) -> Result<(), CacheError>;

    /// Deliver every message received from now on to `subscriber`.
    async fn subscribe(&self, subscriber: Arc<dyn BackplaneSubscriber>)
    -> Result<(), CacheError>;
}

/// Receives backplane notifications.
#[async_trait]
pub trait BackplaneSubscriber: Send + Sync {
    /// Handle one message. Must be idempotent.
    async fn on_message(&self, message: BackplaneMessage);
}

/// Creates the isolated resource scope each population runs in.
///
/// Concurrent populations of unrelated keys must not contend over one shared
/// handle (a database session, a unit of work), so every factory execution gets
/// its own scope. The coordinator releases it once the factory returns, on
/// success and on failure.
#[async_trait]
pub trait ScopeFactory: Send + Sync + 'static {
    type Scope: Send + Sync + 'static;

    /// Create a scope for one population.
    async fn create(&self) -> Result<Self::Scope, CacheError>;

    /// Tear a scope down.
    async fn release(&self, scope: Self::Scope) {
        drop(scope);
    }
}

/// Scope factory for factories that need no resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScope;

#[async_trait]
impl ScopeFactory for NoScope {
    type Scope = ();

    async fn create(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
