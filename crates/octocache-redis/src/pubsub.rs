//! Redis Pub/Sub backplane for cross-instance invalidation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use octocache::{Backplane, BackplaneMessage, BackplaneSubscriber, CacheError, CancellationToken};
use redis::AsyncCommands;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300); // 5 minutes max

/// Backplane publishing JSON [`BackplaneMessage`]s on a Redis channel.
///
/// ## Example Flow
///
/// ```text
/// Instance 1: cache.set("key1", ..)
///   ↓
/// Redis Pub/Sub: PUBLISH octocache:invalidate {"source":..,"key":"key1","action":"set"}
///   ↓
/// Instance 2: listener receives "key1" → removes from L1
/// Instance 3: listener receives "key1" → removes from L1
/// ```
#[derive(Clone)]
pub struct RedisBackplane {
    pool: Pool,
    url: String,
    channel: String,
    shutdown: CancellationToken,
}

impl RedisBackplane {
    /// `url` is used for the dedicated subscriber connections; publishing
    /// goes through `pool`.
    pub fn new(pool: Pool, url: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            pool,
            url: url.into(),
            channel: channel.into(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Stop every listener started by this backplane.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Backplane for RedisBackplane {
    async fn publish(&self, message: BackplaneMessage) -> Result<(), CacheError> {
        let payload = message.to_json()?;
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| {
                CacheError::backplane(format!("failed to get Redis connection: {e}"))
            })?;

        conn.publish::<_, _, ()>(&self.channel, payload)
            .await
            .map_err(|e| CacheError::backplane(format!("failed to publish invalidation: {e}")))?;

        tracing::debug!(
            key = %message.key,
            action = ?message.action,
            "published cache invalidation"
        );
        Ok(())
    }

    async fn subscribe(&self, subscriber: Arc<dyn BackplaneSubscriber>) -> Result<(), CacheError> {
        Listener {
            url: self.url.clone(),
            channel: self.channel.clone(),
            subscriber,
            shutdown: self.shutdown.clone(),
        }
        .start();
        Ok(())
    }
}

/// Background task forwarding channel messages to a subscriber.
///
/// Reconnects with exponential backoff if the connection is lost.
struct Listener {
    url: String,
    channel: String,
    subscriber: Arc<dyn BackplaneSubscriber>,
    shutdown: CancellationToken,
}

/// Reconnect delay, doubling per failed attempt up to [`MAX_BACKOFF`].
#[derive(Debug)]
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }

    /// Delay before the next attempt.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }
}

impl Listener {
    fn start(self) {
        tokio::spawn(async move {
            let mut backoff = Backoff::new();

            loop {
                let result = tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    result = self.run(&mut backoff) => result,
                };

                if let Err(e) = result {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        channel = %self.channel,
                        backoff_secs = delay.as_secs(),
                        "Backplane listener error, reconnecting..."
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }

            tracing::debug!(channel = %self.channel, "backplane listener stopped");
        });
    }

    /// Forward messages until the connection drops.
    ///
    /// The backoff is reset once the subscription is established, so a
    /// connection that was healthy for a while reconnects quickly.
    async fn run(&self, backoff: &mut Backoff) -> Result<(), String> {
        use futures_util::StreamExt;

        // Pub/sub needs a dedicated connection, not a pooled one
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| format!("failed to create Redis client: {e}"))?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;

        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| format!("failed to subscribe: {e}"))?;

        backoff.reset();
        tracing::info!(channel = %self.channel, "Subscribed to backplane channel");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload = match msg.get_payload::<String>() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read backplane message payload");
                    continue;
                }
            };
            match BackplaneMessage::from_json(&payload) {
                Ok(message) => self.subscriber.on_message(message).await,
                Err(e) => tracing::warn!(error = %e, "ignoring malformed backplane message"),
            }
        }

        Err("pub/sub connection closed".to_string())
    }
}
