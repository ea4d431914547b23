#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use octocache::{
    CacheError, CacheKey, DistributedStore, HybridCache, LocalStore, MemoryBackplane, MemoryCache,
    MemoryDistributedStore, RawEntry, ScopeFactory,
};

/// Distributed store that counts calls and can be switched into failure.
#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: MemoryDistributedStore,
    pub gets: Arc<AtomicUsize>,
    pub sets: Arc<AtomicUsize>,
    pub removes: Arc<AtomicUsize>,
    pub failing: Arc<AtomicBool>,
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
            + self.sets.load(Ordering::SeqCst)
            + self.removes.load(Ordering::SeqCst)
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::distributed("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl DistributedStore for CountingStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<RawEntry>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &CacheKey, entry: &RawEntry) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.set(key, entry).await
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.remove(key).await
    }
}

/// Local tier that always fails.
pub struct BrokenLocal;

#[async_trait]
impl LocalStore for BrokenLocal {
    async fn get(&self, _key: &CacheKey) -> Result<Option<RawEntry>, CacheError> {
        Err(CacheError::local("out of memory"))
    }

    async fn insert(&self, _key: &CacheKey, _entry: RawEntry) -> Result<(), CacheError> {
        Err(CacheError::local("out of memory"))
    }

    async fn exists(&self, _key: &CacheKey) -> Result<bool, CacheError> {
        Err(CacheError::local("out of memory"))
    }

    async fn remove(&self, _key: &CacheKey) -> Result<(), CacheError> {
        Err(CacheError::local("out of memory"))
    }

    async fn flush(&self) -> Result<(), CacheError> {
        Err(CacheError::local("out of memory"))
    }
}

/// Scope handed to factories by [`CountingScopes`].
#[derive(Debug)]
pub struct TestScope {
    pub id: u64,
}

/// Scope factory counting created and released scopes.
#[derive(Clone, Default)]
pub struct CountingScopes {
    pub created: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

#[async_trait]
impl ScopeFactory for CountingScopes {
    type Scope = TestScope;

    async fn create(&self) -> Result<TestScope, CacheError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(TestScope {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn release(&self, _scope: TestScope) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// One instance of a cluster sharing a distributed store and a backplane.
pub struct Node {
    pub cache: HybridCache,
    pub local: MemoryCache,
}

pub async fn node(store: &CountingStore, backplane: &MemoryBackplane) -> Node {
    let local = MemoryCache::default();
    let cache = HybridCache::builder()
        .with_local(Arc::new(local.clone()))
        .with_distributed(Arc::new(store.clone()))
        .with_backplane(Arc::new(backplane.clone()))
        .build()
        .await
        .unwrap();
    Node { cache, local }
}

/// Poll `condition` until it holds or a second has passed.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
