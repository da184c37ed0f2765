//! Live notification channel registry
//!
//! Tracks every live push session, grouped per user into a multiplexed
//! channel. Channels are created lazily on first subscription and removed
//! once the last session detaches. Removal is deferred and idempotent
//! (check-then-delete scheduled after the current event-handling turn) so
//! simultaneous multi-session disconnects cannot race a fresh subscriber.
//!
//! The registry is constructed once at process start and injected into
//! request handlers; its lifecycle is tied to the process.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Per-user group of live push sessions
struct UserChannel<S> {
    sessions: DashMap<Uuid, S>,
}

impl<S> UserChannel<S> {
    fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }
}

/// Registry of live channels, indexed by user id
pub struct ChannelRegistry<S> {
    /// Shared with deferred-cleanup tasks, which outlive the borrow that
    /// scheduled them
    channels: Arc<DashMap<String, Arc<UserChannel<S>>>>,
    /// Current live session count across all channels
    count: AtomicUsize,
    /// Global cap on concurrently live sessions
    max_sessions: usize,
}

impl<S: Clone + Send + Sync + 'static> ChannelRegistry<S> {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            count: AtomicUsize::new(0),
            max_sessions,
        }
    }

    pub fn is_at_capacity(&self) -> bool {
        self.count.load(Ordering::Relaxed) >= self.max_sessions
    }

    pub fn session_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Register a new live session for `user_id`. Returns `None` once the
    /// global session cap is reached.
    pub fn subscribe(&self, user_id: &str, sink: S) -> Option<Uuid> {
        if self.is_at_capacity() {
            return None;
        }

        let session_id = Uuid::new_v4();

        // Insert while holding the channel entry so a concurrent deferred
        // cleanup cannot drop the channel between creation and first use
        let entry = self
            .channels
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(UserChannel::new()));
        entry.value().sessions.insert(session_id, sink);
        drop(entry);

        self.count.fetch_add(1, Ordering::Relaxed);

        debug!(
            user_id,
            %session_id,
            live = self.count.load(Ordering::Relaxed),
            "session subscribed"
        );

        Some(session_id)
    }

    /// Detach a session and schedule channel cleanup after the current
    /// turn. Safe to call for already-removed sessions.
    pub fn unsubscribe(&self, user_id: &str, session_id: Uuid) {
        let removed = self
            .channels
            .get(user_id)
            .map(|ch| ch.sessions.remove(&session_id).is_some())
            .unwrap_or(false);

        if removed {
            self.count.fetch_sub(1, Ordering::Relaxed);
            debug!(
                user_id,
                %session_id,
                live = self.count.load(Ordering::Relaxed),
                "session detached"
            );
        }

        let channels = Arc::clone(&self.channels);
        let user = user_id.to_string();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            channels.remove_if(&user, |_, channel| channel.sessions.is_empty());
        });
    }

    /// Snapshot of the live sinks for one user. Empty when no channel
    /// exists, so pushes silently drop.
    pub fn sinks(&self, user_id: &str) -> Vec<S> {
        self.channels
            .get(user_id)
            .map(|ch| ch.sessions.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default()
    }

    /// Forcibly deregister everything (process shutdown). Returns the
    /// drained sinks so the caller can close them.
    pub fn drain_all(&self) -> Vec<S> {
        let mut sinks = Vec::new();
        for entry in self.channels.iter() {
            for session in entry.value().sessions.iter() {
                sinks.push(session.value().clone());
            }
        }
        self.channels.clear();
        self.count.store(0, Ordering::Relaxed);
        sinks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rejection() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new(2);

        assert!(registry.subscribe("a", 1).is_some());
        assert!(registry.subscribe("a", 2).is_some());
        assert!(registry.is_at_capacity());
        assert!(registry.subscribe("b", 3).is_none());
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn test_two_sessions_share_one_channel() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new(10);

        registry.subscribe("amira", 1).unwrap();
        registry.subscribe("amira", 2).unwrap();

        assert_eq!(registry.channel_count(), 1);
        let mut sinks = registry.sinks("amira");
        sinks.sort();
        assert_eq!(sinks, vec![1, 2]);
    }

    #[test]
    fn test_push_to_absent_channel_is_empty() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new(10);
        assert!(registry.sinks("nobody").is_empty());
    }

    #[tokio::test]
    async fn test_deferred_cleanup_removes_empty_channel() {
        let registry = Arc::new(ChannelRegistry::<u32>::new(10));

        let a = registry.subscribe("amira", 1).unwrap();
        let b = registry.subscribe("amira", 2).unwrap();

        // Simultaneous disconnects
        registry.unsubscribe("amira", a);
        registry.unsubscribe("amira", b);

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_spares_fresh_subscriber() {
        let registry = Arc::new(ChannelRegistry::<u32>::new(10));

        let a = registry.subscribe("amira", 1).unwrap();
        registry.unsubscribe("amira", a);

        // A new session arrives before the deferred cleanup runs
        registry.subscribe("amira", 2).unwrap();

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(registry.channel_count(), 1);
        assert_eq!(registry.sinks("amira"), vec![2]);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let registry = Arc::new(ChannelRegistry::<u32>::new(10));

        let a = registry.subscribe("amira", 1).unwrap();
        registry.unsubscribe("amira", a);
        registry.unsubscribe("amira", a);

        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_drain_all() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new(10);
        registry.subscribe("a", 1).unwrap();
        registry.subscribe("b", 2).unwrap();

        let drained = registry.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.channel_count(), 0);
    }
}
