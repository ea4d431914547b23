//! Backplane messages and the local-tier invalidator.
//!
//! ## Example Flow
//!
//! ```text
//! Instance 1: cache.set("key1", ..)
//!   ↓
//! Backplane: { source: <instance 1>, key: "key1", action: set }
//!   ↓
//! Instance 2: LocalInvalidator receives "key1" → removes from local tier
//! Instance 3: LocalInvalidator receives "key1" → removes from local tier
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CacheError;
use crate::key::CacheKey;
use crate::traits::{BackplaneSubscriber, LocalStore};

/// What happened to a key on the publishing instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackplaneAction {
    /// A new value was written.
    Set,
    /// The key was removed.
    Remove,
    /// The whole local tier should be dropped.
    Clear,
}

/// Notification exchanged between instances sharing a distributed tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackplaneMessage {
    /// Instance that published the message.
    pub source: Uuid,
    /// Normalized key (ignored for `Clear`).
    pub key: String,
    pub action: BackplaneAction,
}

impl BackplaneMessage {
    pub fn set(source: Uuid, key: &CacheKey) -> Self {
        Self {
            source,
            key: key.as_str().to_owned(),
            action: BackplaneAction::Set,
        }
    }

    pub fn remove(source: Uuid, key: &CacheKey) -> Self {
        Self {
            source,
            key: key.as_str().to_owned(),
            action: BackplaneAction::Remove,
        }
    }

    pub fn clear(source: Uuid) -> Self {
        Self {
            source,
            key: String::new(),
            action: BackplaneAction::Clear,
        }
    }

    /// Encode as JSON for text transports.
    pub fn to_json(&self) -> Result<String, CacheError> {
        serde_json::to_string(self).map_err(|e| CacheError::serialization(e.to_string()))
    }

    /// Decode from JSON.
    pub fn from_json(payload: &str) -> Result<Self, CacheError> {
        serde_json::from_str(payload).map_err(|e| CacheError::serialization(e.to_string()))
    }
}

/// Keeps one instance's local tier coherent with the others.
///
/// Every handled message only evicts, so duplicated or reordered deliveries
/// are harmless: the next read goes to the distributed tier.
pub struct LocalInvalidator {
    instance_id: Uuid,
    local: Arc<dyn LocalStore>,
}

impl LocalInvalidator {
    pub fn new(instance_id: Uuid, local: Arc<dyn LocalStore>) -> Self {
        Self { instance_id, local }
    }

    /// Evict `key` from the local tier.
    pub async fn invalidate(&self, key: &CacheKey) {
        if let Err(e) = self.local.remove(key).await {
            tracing::warn!(key = %key, error = %e, "failed to evict remotely invalidated key");
        } else {
            tracing::debug!(key = %key, "local entry invalidated by backplane");
        }
    }
}

#[async_trait]
impl BackplaneSubscriber for LocalInvalidator {
    async fn on_message(&self, message: BackplaneMessage) {
        if message.source == self.instance_id {
            return;
        }

        match message.action {
            BackplaneAction::Set | BackplaneAction::Remove => {
                if message.key.trim().is_empty() {
                    tracing::warn!(
                        source = %message.source,
                        "ignoring backplane message without key"
                    );
                    return;
                }
                self.invalidate(&CacheKey::from_normalized(message.key)).await;
            }
            BackplaneAction::Clear => {
                if let Err(e) = self.local.flush().await {
                    tracing::warn!(error = %e, "failed to flush local tier on remote clear");
                } else {
                    tracing::debug!(source = %message.source, "local tier cleared by backplane");
                }
            }
        }
    }
}
