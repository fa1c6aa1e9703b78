//! Cache/KV façade + per-user pub/sub bus (spec.md §4.2 C2, §4.6 C6).
//!
//! Subscriber-set and snapshot-cache operations are plain Redis
//! SET/SADD/SMEMBERS wrappers; `PublishUser`/`SubscribeUser` ride the same
//! per-user keyed broadcaster `conflux_service::sse` uses for local
//! delivery, bridged across replicas by Redis Pub/Sub on a per-user channel
//! name so every replica holding a local subscriber for a user also
//! receives publishes made on any other replica (spec.md §4.6,
//! "Cross-process").
//!
//! Double-delivery avoidance: `publish_user` never touches the local
//! broadcaster directly when Redis is configured -- only the relay task
//! spawned by `spawn_relay` does, after round-tripping through Redis. This
//! keeps single- and multi-replica deployments indistinguishable from a
//! publisher's point of view.

use std::time::Duration;

use deadpool_redis::Pool as RedisPool;
use futures::StreamExt;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use conflux_service::error::{Error, Result};
use conflux_service::shutdown::ShutdownHandle;
use conflux_service::sse::{Frame, SseBroadcaster};

const USER_CHANNEL_PREFIX: &str = "conflux:user:";
const USER_CHANNEL_PATTERN: &str = "conflux:user:*";

/// Thin wrapper over Redis plus the in-process broadcaster, implementing
/// the C2 contract for both scalar/set caching and the C6 fan-out bus.
#[derive(Clone)]
pub struct PubSub {
    redis_pool: Option<RedisPool>,
    redis_url: Option<String>,
    broadcaster: SseBroadcaster,
}

impl PubSub {
    pub fn new(redis_pool: Option<RedisPool>, redis_url: Option<String>, broadcaster: SseBroadcaster) -> Self {
        Self { redis_pool, redis_url, broadcaster }
    }

    fn user_channel(user_id: &str) -> String {
        format!("{USER_CHANNEL_PREFIX}{user_id}")
    }

    /// Read and decode a cached value. A miss, decode failure, or Redis
    /// outage all return `Ok(None)` -- the caller falls back to the
    /// database, per spec.md §4.2 ("a miss on GetJSON falls back to the
    /// database").
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(pool) = &self.redis_pool else {
            return Ok(None);
        };
        let mut conn = match pool.get().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(key, error = %e, "redis unavailable for GetJSON, falling back");
                return Ok(None);
            }
        };
        let raw: Option<String> = conn.get(key).await.unwrap_or(None);
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// Write with expiry. Overwrites unconditionally. Failure is logged,
    /// not propagated.
    pub async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let Some(pool) = &self.redis_pool else {
            return Ok(());
        };
        let Ok(mut conn) = pool.get().await else {
            tracing::warn!(key, "redis unavailable for SetJSON");
            return Ok(());
        };
        let encoded = serde_json::to_string(value).map_err(Error::from)?;
        let _: std::result::Result<(), _> = conn.set_ex(key, encoded, ttl.as_secs().max(1)).await;
        Ok(())
    }

    pub async fn delete(&self, key: &str) {
        let Some(pool) = &self.redis_pool else {
            return;
        };
        if let Ok(mut conn) = pool.get().await {
            let _: std::result::Result<(), _> = conn.del(key).await;
        }
    }

    /// Idempotent set insert. Failure is logged, never propagated
    /// (spec.md §4.2).
    pub async fn add_subscriber(&self, set_key: &str, user_id: &str) {
        let Some(pool) = &self.redis_pool else {
            return;
        };
        match pool.get().await {
            Ok(mut conn) => {
                if let Err(e) = conn.sadd::<_, _, ()>(set_key, user_id).await {
                    tracing::warn!(set_key, user_id, error = %e, "AddSubscriber failed");
                }
            }
            Err(e) => tracing::warn!(set_key, error = %e, "redis unavailable for AddSubscriber"),
        }
    }

    /// Idempotent set remove; a no-op on a non-member.
    pub async fn remove_subscriber(&self, set_key: &str, user_id: &str) {
        let Some(pool) = &self.redis_pool else {
            return;
        };
        match pool.get().await {
            Ok(mut conn) => {
                if let Err(e) = conn.srem::<_, _, ()>(set_key, user_id).await {
                    tracing::warn!(set_key, user_id, error = %e, "RemoveSubscriber failed");
                }
            }
            Err(e) => tracing::warn!(set_key, error = %e, "redis unavailable for RemoveSubscriber"),
        }
    }

    /// Full, unordered enumeration of a subscriber set.
    pub async fn get_subscribers(&self, set_key: &str) -> Vec<String> {
        let Some(pool) = &self.redis_pool else {
            return Vec::new();
        };
        match pool.get().await {
            Ok(mut conn) => conn.smembers(set_key).await.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(set_key, error = %e, "redis unavailable for GetSubscribers");
                Vec::new()
            }
        }
    }

    /// Deliver `payload` to every live connection for `user_id`. When
    /// Redis is configured this publishes on the cross-replica channel
    /// only -- the relay task is the sole path back to the local
    /// broadcaster, so a publishing replica never double-delivers to its
    /// own local subscribers. Without Redis this talks to the in-process
    /// broadcaster directly (single-replica deployment, per spec.md §4.6).
    pub async fn publish_user(&self, user_id: &str, payload: impl Into<Frame>) {
        let frame = payload.into();
        let Some(pool) = &self.redis_pool else {
            self.broadcaster.publish_user(user_id, frame);
            return;
        };
        match pool.get().await {
            Ok(mut conn) => {
                let channel = Self::user_channel(user_id);
                if let Err(e) = conn.publish::<_, _, ()>(&channel, frame.as_ref()).await {
                    tracing::warn!(user_id, error = %e, "PublishUser failed");
                }
            }
            Err(e) => tracing::warn!(user_id, error = %e, "redis unavailable for PublishUser"),
        }
    }

    /// Open a receive-only stream of payloads delivered to `user_id`.
    pub fn subscribe_user(&self, user_id: &str) -> tokio::sync::broadcast::Receiver<Frame> {
        self.broadcaster.subscribe_user(user_id)
    }

    pub fn broadcaster(&self) -> &SseBroadcaster {
        &self.broadcaster
    }

    /// Spawn the background relay that bridges Redis Pub/Sub to the local
    /// broadcaster, reconnecting with backoff on disconnect. A no-op if
    /// Redis isn't configured (single-replica deployments rely purely on
    /// the in-process broadcaster).
    pub fn spawn_relay(&self, shutdown: ShutdownHandle) {
        let Some(url) = self.redis_url.clone() else {
            tracing::info!("redis not configured, cross-replica pub/sub relay disabled");
            return;
        };
        let broadcaster = self.broadcaster.clone();

        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                if shutdown.is_shutting_down() {
                    return;
                }
                match run_relay_once(&url, &broadcaster, &shutdown).await {
                    Ok(()) => return,
                    Err(e) => {
                        attempt += 1;
                        let delay = Duration::from_secs(2_u64.saturating_pow(attempt.min(5)));
                        tracing::warn!(error = %e, attempt, ?delay, "pub/sub relay disconnected, retrying");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.wait() => return,
                        }
                    }
                }
            }
        });
    }
}

async fn run_relay_once(url: &str, broadcaster: &SseBroadcaster, shutdown: &ShutdownHandle) -> Result<()> {
    let client = redis::Client::open(url).map_err(|e| Error::TransientInternal(e.to_string()))?;
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| Error::TransientInternal(e.to_string()))?;
    pubsub
        .psubscribe(USER_CHANNEL_PATTERN)
        .await
        .map_err(|e| Error::TransientInternal(e.to_string()))?;

    tracing::info!(pattern = USER_CHANNEL_PATTERN, "pub/sub relay subscribed");

    let mut stream = pubsub.on_message();
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        tokio::select! {
            msg = stream.next() => {
                let Some(msg) = msg else { return Ok(()) };
                let channel = msg.get_channel_name().to_string();
                let Some(user_id) = channel.strip_prefix(USER_CHANNEL_PREFIX) else { continue };
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "undecodable relay payload");
                        continue;
                    }
                };
                broadcaster.publish_user(user_id, Frame::from(payload));
            }
            _ = shutdown_rx.changed() => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_pubsub(capacity: usize) -> PubSub {
        PubSub::new(None, None, SseBroadcaster::new(capacity))
    }

    #[tokio::test]
    async fn test_publish_without_redis_uses_local_broadcaster() {
        let pubsub = local_pubsub(8);
        let mut rx = pubsub.subscribe_user("user-a");
        pubsub.publish_user("user-a", Frame::from("hi")).await;
        assert_eq!(&*rx.recv().await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_cache_ops_are_noops_without_redis() {
        let pubsub = local_pubsub(8);
        pubsub.add_subscriber("finance:subscribers:AAPL", "user-a").await;
        assert!(pubsub.get_subscribers("finance:subscribers:AAPL").await.is_empty());
        pubsub.set_json("cache:finance", &serde_json::json!({"a": 1}), Duration::from_secs(30)).await.unwrap();
        let cached: Option<serde_json::Value> = pubsub.get_json("cache:finance").await.unwrap();
        assert!(cached.is_none());
    }
}
