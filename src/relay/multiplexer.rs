//! Per-session publish/subscribe hub
//!
//! Every browser connection watching a session owns one `Subscription`.
//! `publish` hands an event to each current subscriber of that session
//! without blocking: subscribers get a bounded channel, and one that falls a
//! full buffer behind is dropped instead of stalling the relay. Nothing is
//! buffered for sessions without subscribers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::events::{ChannelKind, StreamEvent};

pub const DEFAULT_MAX_SUBSCRIBERS: usize = 16;
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Identifies one registration. Stays valid across session re-keying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscriber {
    id: u64,
    channels: Vec<ChannelKind>,
    tx: mpsc::Sender<StreamEvent>,
}

impl Subscriber {
    fn wants(&self, kind: ChannelKind) -> bool {
        self.channels.contains(&kind)
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, Vec<Subscriber>>,
    /// subscriber id -> session key it is currently registered under
    owners: HashMap<u64, String>,
}

impl Registry {
    fn remove(&mut self, id: u64) -> bool {
        let Some(session_id) = self.owners.remove(&id) else {
            return false;
        };
        if let Some(subs) = self.sessions.get_mut(&session_id) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                self.sessions.remove(&session_id);
            }
        }
        true
    }
}

pub struct Multiplexer {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    max_per_session: usize,
    buffer: usize,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SUBSCRIBERS, DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl Multiplexer {
    pub fn new(max_per_session: usize, buffer: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            max_per_session: max_per_session.max(1),
            buffer: buffer.max(1),
        }
    }

    /// Subscribe to data, end and error events of a session
    pub fn subscribe(self: &Arc<Self>, session_id: &str) -> Subscription {
        self.subscribe_to(session_id, &ChannelKind::ALL)
    }

    /// Subscribe to a subset of channels.
    ///
    /// When the session already has `max_per_session` subscribers the oldest
    /// one is evicted (its receiver closes) and a warning is logged.
    pub fn subscribe_to(self: &Arc<Self>, session_id: &str, channels: &[ChannelKind]) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);

        let mut registry = self.registry.lock();
        let evicted: Vec<u64> = {
            let subs = registry.sessions.entry(session_id.to_string()).or_default();
            let excess = (subs.len() + 1).saturating_sub(self.max_per_session);
            subs.drain(..excess).map(|s| s.id).collect()
        };
        if !evicted.is_empty() {
            warn!(
                session_id,
                limit = self.max_per_session,
                evicted = evicted.len(),
                "Subscriber limit reached, evicting oldest subscribers"
            );
            for old in &evicted {
                registry.owners.remove(old);
            }
        }

        registry
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .push(Subscriber {
                id,
                channels: channels.to_vec(),
                tx,
            });
        registry.owners.insert(id, session_id.to_string());
        drop(registry);

        debug!(session_id, subscriber = id, "Subscribed");

        Subscription {
            handle: SubscriptionHandle(id),
            events: rx,
            hub: Arc::clone(self),
        }
    }

    /// Deliver an event to every current subscriber of the session.
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, session_id: &str, event: StreamEvent) -> usize {
        let kind = event.kind();
        let mut registry = self.registry.lock();
        let Some(subs) = registry.sessions.get(session_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for sub in subs.iter().filter(|s| s.wants(kind)) {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(session_id, subscriber = sub.id, "Dropping slow subscriber");
                    dead.push(sub.id);
                }
                Err(TrySendError::Closed(_)) => dead.push(sub.id),
            }
        }

        for id in dead {
            registry.remove(id);
        }
        delivered
    }

    /// Remove a registration. Unknown or already-removed handles are a no-op.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let removed = self.registry.lock().remove(handle.0);
        if removed {
            debug!(subscriber = handle.0, "Unsubscribed");
        }
        removed
    }

    /// Move every subscriber of `old_id` under `new_id`. Returns how many moved.
    pub fn rekey(&self, old_id: &str, new_id: &str) -> usize {
        let mut registry = self.registry.lock();
        let Some(moved) = registry.sessions.remove(old_id) else {
            return 0;
        };
        let count = moved.len();
        for sub in &moved {
            registry.owners.insert(sub.id, new_id.to_string());
        }
        registry
            .sessions
            .entry(new_id.to_string())
            .or_default()
            .extend(moved);
        count
    }

    /// Drop every subscriber of a session. Their receivers observe a closed channel.
    pub fn close_session(&self, session_id: &str) -> usize {
        let mut registry = self.registry.lock();
        let Some(subs) = registry.sessions.remove(session_id) else {
            return 0;
        };
        for sub in &subs {
            registry.owners.remove(&sub.id);
        }
        subs.len()
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.registry
            .lock()
            .sessions
            .get(session_id)
            .map_or(0, Vec::len)
    }
}

/// A live registration. Dropping it unsubscribes.
pub struct Subscription {
    handle: SubscriptionHandle,
    events: mpsc::Receiver<StreamEvent>,
    hub: Arc<Multiplexer>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Next event, or `None` once the subscriber has been removed from the hub
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::events::Delta;

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::Delta(Delta {
            text: text.into(),
            finish_reason: None,
            session_id: "s".into(),
            request_id: None,
        })
    }

    fn hub() -> Arc<Multiplexer> {
        Arc::new(Multiplexer::new(4, 8))
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let hub = hub();
        assert_eq!(hub.publish("nobody", delta("x")), 0);
        assert_eq!(hub.subscriber_count("nobody"), 0);
    }

    #[test]
    fn test_late_subscriber_misses_past_events() {
        let hub = hub();
        hub.publish("s1", delta("early"));
        let mut sub = hub.subscribe("s1");
        assert!(sub.try_recv().is_none());

        hub.publish("s1", delta("late"));
        assert_eq!(sub.try_recv(), Some(delta("late")));
    }

    #[test]
    fn test_fan_out_without_cross_talk() {
        let hub = hub();
        let mut tab_a = hub.subscribe("s1");
        let mut tab_b = hub.subscribe("s1");
        let mut other = hub.subscribe("s2");

        assert_eq!(hub.publish("s1", delta("hi")), 2);
        assert_eq!(tab_a.try_recv(), Some(delta("hi")));
        assert_eq!(tab_b.try_recv(), Some(delta("hi")));
        assert!(other.try_recv().is_none());
    }

    #[test]
    fn test_order_preserved_per_subscriber() {
        let hub = hub();
        let mut sub = hub.subscribe("s1");
        for text in ["a", "b", "c"] {
            hub.publish("s1", delta(text));
        }
        hub.publish("s1", StreamEvent::End);

        assert_eq!(sub.try_recv(), Some(delta("a")));
        assert_eq!(sub.try_recv(), Some(delta("b")));
        assert_eq!(sub.try_recv(), Some(delta("c")));
        assert_eq!(sub.try_recv(), Some(StreamEvent::End));
    }

    #[test]
    fn test_double_unsubscribe_is_noop() {
        let hub = hub();
        let first = hub.subscribe("s1");
        let mut second = hub.subscribe("s1");

        assert!(hub.unsubscribe(first.handle()));
        assert!(!hub.unsubscribe(first.handle()));
        drop(first);

        assert_eq!(hub.publish("s1", delta("still here")), 1);
        assert_eq!(second.try_recv(), Some(delta("still here")));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let hub = hub();
        let sub = hub.subscribe("s1");
        assert_eq!(hub.subscriber_count("s1"), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count("s1"), 0);
    }

    #[test]
    fn test_channel_filter() {
        let hub = hub();
        let mut end_only = hub.subscribe_to("s1", &[ChannelKind::End]);

        assert_eq!(hub.publish("s1", delta("skip")), 0);
        assert_eq!(hub.publish("s1", StreamEvent::error("skip")), 0);
        assert_eq!(hub.publish("s1", StreamEvent::End), 1);
        assert_eq!(end_only.try_recv(), Some(StreamEvent::End));
    }

    #[test]
    fn test_rekey_moves_subscribers() {
        let hub = hub();
        let mut sub = hub.subscribe("temp_abc");

        assert_eq!(hub.rekey("temp_abc", "real123"), 1);
        assert_eq!(hub.publish("temp_abc", delta("lost")), 0);
        assert_eq!(hub.publish("real123", delta("found")), 1);
        assert_eq!(sub.try_recv(), Some(delta("found")));

        // The handle still resolves after the move
        let handle = sub.handle();
        assert!(hub.unsubscribe(handle));
        assert_eq!(hub.subscriber_count("real123"), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped() {
        let hub = Arc::new(Multiplexer::new(4, 2));
        let mut slow = hub.subscribe("s1");

        assert_eq!(hub.publish("s1", delta("1")), 1);
        assert_eq!(hub.publish("s1", delta("2")), 1);
        // Buffer full: the subscriber is removed rather than blocking the publisher
        assert_eq!(hub.publish("s1", delta("3")), 0);
        assert_eq!(hub.subscriber_count("s1"), 0);

        assert_eq!(slow.recv().await, Some(delta("1")));
        assert_eq!(slow.recv().await, Some(delta("2")));
        assert_eq!(slow.recv().await, None);
    }

    #[tokio::test]
    async fn test_limit_evicts_oldest() {
        let hub = Arc::new(Multiplexer::new(2, 8));
        let mut oldest = hub.subscribe("s1");
        let _middle = hub.subscribe("s1");
        let _newest = hub.subscribe("s1");

        assert_eq!(hub.subscriber_count("s1"), 2);
        assert_eq!(oldest.recv().await, None);
        // Evicted handle is already gone
        assert!(!hub.unsubscribe(oldest.handle()));
    }

    #[tokio::test]
    async fn test_close_session() {
        let hub = hub();
        let mut sub = hub.subscribe("s1");
        assert_eq!(hub.close_session("s1"), 1);
        assert_eq!(sub.recv().await, None);
        assert_eq!(hub.close_session("s1"), 0);
    }
}
