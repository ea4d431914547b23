//! # octocache
//!
//! Hybrid two-tier cache for services running several instances.
//!
//! Values live in a fast in-process tier (L1, [`MemoryCache`] on moka) backed
//! by an authoritative shared tier (L2, any [`DistributedStore`]). A
//! [`Backplane`] tells the other instances to drop their L1 copy whenever a
//! key changes.
//!
//! ## Overview
//!
//! [`HybridCache`] exposes:
//! - `set` / `get` / `remove` over both tiers
//! - `get_or_populate`: one factory execution per key at a time, whatever the
//!   number of concurrent callers, with a fresh resource scope per execution
//! - fail-safe: a stale value is served when the factory fails
//! - eager refresh: a value nearing expiration is refreshed in the background
//!
//! ## Example
//!
//! ```ignore
//! use octocache::{HybridCache, EntryOverrides, MemoryBackplane, MemoryDistributedStore};
//! use tokio_util::sync::CancellationToken;
//!
//! let cache = HybridCache::builder()
//!     .with_distributed(Arc::new(MemoryDistributedStore::new()))
//!     .with_backplane(Arc::new(MemoryBackplane::new()))
//!     .build()
//!     .await?;
//!
//! let cancel = CancellationToken::new();
//! cache.set("greeting", &"hello", EntryOverrides::none(), &cancel).await?;
//! let greeting: Option<String> = cache.get("greeting", &cancel).await?;
//! ```
//!
//! The Redis tier and backplane live in the `octocache-redis` crate.

pub mod backplane;
pub mod codec;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod entry;
pub mod error;
pub mod key;
pub mod local;
pub mod memory;
pub mod metrics;
pub mod observability;
pub mod options;
pub mod traits;

pub use backplane::{BackplaneAction, BackplaneMessage, LocalInvalidator};
pub use config::{OctocacheConfig, load_config};
pub use context::PopulationContext;
pub use coordinator::{HybridCache, HybridCacheBuilder};
pub use entry::{CacheEntry, RawEntry};
pub use error::{BoxError, CacheError, ErrorCategory};
pub use key::{CacheKey, KeyNormalizer};
pub use local::{Expiration, MemoryCache};
pub use memory::{MemoryBackplane, MemoryDistributedStore};
pub use options::{EntryOptions, EntryOverrides, PendingOptions, Priority};
pub use traits::{
    Backplane, BackplaneSubscriber, DistributedStore, LocalStore, NoScope, ScopeFactory,
};

pub use tokio_util::sync::CancellationToken;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
