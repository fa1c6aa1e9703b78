//! Per-user keyed broadcaster -- the in-process half of the fan-out bus
//! (spec.md §4.6, C6).
//!
//! Generalized from a single global channel / named-topic map (the
//! teacher's original shape) to a map keyed by `user_id`, because this
//! application's fan-out key is the user, not an ad hoc topic string: every
//! SSE connection belonging to the same user subscribes to the same
//! broadcast channel, so one CDC-derived publish reaches every open tab.
//!
//! `tokio::sync::broadcast`'s own lagging-receiver behavior -- the oldest
//! unread message is overwritten once the bounded buffer is full, and a
//! lagging receiver's next `recv()` jumps forward and reports how many it
//! missed -- is exactly the drop-oldest backpressure policy spec.md §4.6
//! and Testable Property 8 call for, so no separate bounded queue is
//! layered on top of it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::connection::ConnectionId;

/// A single SSE wire frame, pre-serialized. `Arc<str>` keeps clones (one
/// per subscriber on every publish) cheap.
pub type Frame = Arc<str>;

/// Keyed broadcaster: one `broadcast` channel per user, created lazily on
/// first subscribe and dropped once its last subscriber disconnects.
#[derive(Clone)]
pub struct SseBroadcaster {
    channels: Arc<DashMap<String, broadcast::Sender<Frame>>>,
    capacity: usize,
    drop_counts: Arc<DashMap<ConnectionId, AtomicU64>>,
}

impl SseBroadcaster {
    /// `capacity` is the per-user channel's bounded buffer size
    /// (`SseConfig::buffer_size`, recommended ~64 per spec.md §4.6).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            drop_counts: Arc::new(DashMap::new()),
        }
    }

    /// Open a receive-only stream for `user_id`, creating its channel if
    /// this is the first subscriber (spec.md's `SubscribeUser`).
    pub fn subscribe_user(&self, user_id: &str) -> broadcast::Receiver<Frame> {
        self.channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver `frame` to every live subscriber of `user_id`
    /// (spec.md's `PublishToUser`). Non-blocking; silently drops the
    /// message if the user currently has no subscribers -- this is the
    /// at-most-once contract, not an error.
    ///
    /// Once the last subscriber for a user disconnects, the channel is
    /// removed so the map stays bounded by the active-user count rather
    /// than the total user count (spec.md §9, "keyed broadcaster").
    pub fn publish_user(&self, user_id: &str, frame: Frame) -> usize {
        let Some(entry) = self.channels.get(user_id) else {
            return 0;
        };
        match entry.send(frame) {
            Ok(n) => n,
            Err(_) => {
                drop(entry);
                self.channels.remove(user_id);
                0
            }
        }
    }

    /// Number of users with at least one live SSE connection.
    pub fn active_user_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of live subscribers for a given user (0 if none).
    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.channels
            .get(user_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Record a dropped (lagged) frame for a connection, returning the new
    /// running total. Used by the write loop to decide whether the drop
    /// rate has crossed `SseConfig::drop_threshold` and the connection
    /// should be proactively closed (spec.md §4.6).
    pub fn record_drop(&self, connection_id: ConnectionId) -> u64 {
        self.drop_counts
            .entry(connection_id)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }

    pub fn drop_count(&self, connection_id: &ConnectionId) -> u64 {
        self.drop_counts
            .get(connection_id)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Clear per-connection bookkeeping on teardown.
    pub fn forget_connection(&self, connection_id: &ConnectionId) {
        self.drop_counts.remove(connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let broadcaster = SseBroadcaster::new(8);
        let mut rx = broadcaster.subscribe_user("user-a");

        let delivered = broadcaster.publish_user("user-a", Frame::from("hello"));
        assert_eq!(delivered, 1);

        let frame = rx.recv().await.unwrap();
        assert_eq!(&*frame, "hello");
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_is_silent() {
        let broadcaster = SseBroadcaster::new(8);
        let delivered = broadcaster.publish_user("nobody", Frame::from("hi"));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_per_user_isolation() {
        let broadcaster = SseBroadcaster::new(8);
        let mut rx_a = broadcaster.subscribe_user("user-a");
        let mut rx_b = broadcaster.subscribe_user("user-b");

        broadcaster.publish_user("user-a", Frame::from("only-for-a"));

        let frame = rx_a.recv().await.unwrap();
        assert_eq!(&*frame, "only-for-a");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multiple_connections_same_user_both_receive() {
        let broadcaster = SseBroadcaster::new(8);
        let mut rx1 = broadcaster.subscribe_user("user-a");
        let mut rx2 = broadcaster.subscribe_user("user-a");

        broadcaster.publish_user("user-a", Frame::from("tick"));

        assert_eq!(&*rx1.recv().await.unwrap(), "tick");
        assert_eq!(&*rx2.recv().await.unwrap(), "tick");
    }

    #[tokio::test]
    async fn test_drop_oldest_on_overflow() {
        let broadcaster = SseBroadcaster::new(2);
        let mut rx = broadcaster.subscribe_user("user-a");

        for i in 0..5 {
            broadcaster.publish_user("user-a", Frame::from(i.to_string()));
        }

        // The receiver lagged -- it should observe a Lagged error rather
        // than block the publisher, and then resume from the newest frames.
        let result = rx.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }

    #[test]
    fn test_drop_count_tracking() {
        let broadcaster = SseBroadcaster::new(8);
        let id = ConnectionId::new();
        assert_eq!(broadcaster.drop_count(&id), 0);
        assert_eq!(broadcaster.record_drop(id), 1);
        assert_eq!(broadcaster.record_drop(id), 2);
        assert_eq!(broadcaster.drop_count(&id), 2);
        broadcaster.forget_connection(&id);
        assert_eq!(broadcaster.drop_count(&id), 0);
    }

    #[tokio::test]
    async fn test_channel_pruned_after_last_subscriber_drops() {
        let broadcaster = SseBroadcaster::new(8);
        let rx = broadcaster.subscribe_user("user-a");
        assert_eq!(broadcaster.active_user_count(), 1);

        drop(rx);
        broadcaster.publish_user("user-a", Frame::from("gone"));
        assert_eq!(broadcaster.active_user_count(), 0);
    }
}
