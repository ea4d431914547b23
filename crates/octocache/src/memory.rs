//! In-process distributed tier and backplane.
//!
//! Used for single-process deployments that still want the hybrid API, and to
//! simulate several instances sharing one distributed tier in tests: clones of
//! [`MemoryDistributedStore`] and [`MemoryBackplane`] share their state.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::broadcast;

use crate::backplane::BackplaneMessage;
use crate::entry::RawEntry;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::traits::{Backplane, BackplaneSubscriber, DistributedStore};

/// Distributed store kept in process memory.
#[derive(Clone, Default)]
pub struct MemoryDistributedStore {
    entries: Arc<DashMap<String, RawEntry>>,
}

impl MemoryDistributedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including physically expired ones not yet
    /// read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DistributedStore for MemoryDistributedStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<RawEntry>, CacheError> {
        let now = OffsetDateTime::now_utc();
        if let Some(entry) = self.entries.get(key.as_str()) {
            if entry.remaining_physical(now).is_some() {
                return Ok(Some(entry.clone()));
            }
            drop(entry);
            self.entries.remove(key.as_str());
        }
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, entry: &RawEntry) -> Result<(), CacheError> {
        self.entries.insert(key.as_str().to_owned(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.entries.remove(key.as_str());
        Ok(())
    }
}

const BACKPLANE_CAPACITY: usize = 1024;

/// Backplane over a tokio broadcast channel.
#[derive(Clone)]
pub struct MemoryBackplane {
    sender: broadcast::Sender<BackplaneMessage>,
}

impl MemoryBackplane {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BACKPLANE_CAPACITY);
        Self { sender }
    }
}

impl Default for MemoryBackplane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backplane for MemoryBackplane {
    async fn publish(&self, message: BackplaneMessage) -> Result<(), CacheError> {
        // No receivers just means no other instance is listening.
        let _ = self.sender.send(message);
        Ok(())
    }

    async fn subscribe(
        &self,
        subscriber: Arc<dyn BackplaneSubscriber>,
    ) -> Result<(), CacheError> {
        let mut receiver = self.sender.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => subscriber.on_message(message).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "backplane subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheEntry;
    use crate::key::KeyNormalizer;
    use crate::options::EntryOptions;
    use parking_lot::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_store_set_get_remove() {
        let store = MemoryDistributedStore::new();
        let key = KeyNormalizer::new().normalize("k").unwrap();
        let entry: RawEntry = CacheEntry::new(Arc::new(vec![9]), &EntryOptions::default());

        store.set(&key, &entry).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(entry));

        store.remove(&key).await.unwrap();
        store.remove(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_drops_physically_expired() {
        let store = MemoryDistributedStore::new();
        let key = KeyNormalizer::new().normalize("k").unwrap();
        let options = EntryOptions::default()
            .with_duration(Duration::from_secs(1))
            .with_fail_safe(false);
        let entry: RawEntry = CacheEntry::new(Arc::new(vec![9]), &options)
            .created_at(OffsetDateTime::now_utc() - Duration::from_secs(5));

        store.set(&key, &entry).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
        assert_eq!(store.len(), 0);
    }

    struct Recorder(Mutex<Vec<BackplaneMessage>>);

    #[async_trait]
    impl BackplaneSubscriber for Recorder {
        async fn on_message(&self, message: BackplaneMessage) {
            self.0.lock().push(message);
        }
    }

    #[tokio::test]
    async fn test_backplane_delivers_to_subscribers() {
        let backplane = MemoryBackplane::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        backplane.subscribe(recorder.clone()).await.unwrap();

        let message = BackplaneMessage::clear(Uuid::new_v4());
        backplane.clone().publish(message.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.0.lock().as_slice(), &[message]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let backplane = MemoryBackplane::new();
        backplane
            .publish(BackplaneMessage::clear(Uuid::new_v4()))
            .await
            .unwrap();
    }
}
