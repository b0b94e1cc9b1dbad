//! Topic-based pub/sub shared by every endpoint on one server.

use std::collections::HashMap;

use beatbox_core::{ConnectionId, OutboundFrame, SocketRef, SubscriptionChange};
use dashmap::DashMap;
use tracing::debug;

/// Topic name to subscribed sockets.
///
/// Guards are never held while sending or while returning to the caller, so
/// subscription callbacks may publish or subscribe again.
#[derive(Default)]
pub struct TopicHub {
    topics: DashMap<String, HashMap<ConnectionId, SocketRef>>,
}

impl TopicHub {
    /// Empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `socket` to `topic`. `None` if it was already subscribed.
    pub fn subscribe(&self, socket: &SocketRef, topic: &str) -> Option<SubscriptionChange> {
        let mut subscribers = self.topics.entry(topic.to_owned()).or_default();
        let before = subscribers.len();
        if subscribers.contains_key(socket.id()) {
            return None;
        }
        let _ = subscribers.insert(socket.id().clone(), SocketRef::clone(socket));
        Some(SubscriptionChange {
            topic: topic.to_owned(),
            subscribers_before: before,
            subscribers_after: subscribers.len(),
        })
    }

    /// Remove `id` from `topic`. `None` if it was not subscribed.
    pub fn unsubscribe(&self, id: &ConnectionId, topic: &str) -> Option<SubscriptionChange> {
        let change = {
            let mut subscribers = self.topics.get_mut(topic)?;
            let before = subscribers.len();
            let _ = subscribers.remove(id)?;
            SubscriptionChange {
                topic: topic.to_owned(),
                subscribers_before: before,
                subscribers_after: subscribers.len(),
            }
        };
        if change.subscribers_after == 0 {
            let _ = self.topics.remove_if(topic, |_, subs| subs.is_empty());
        }
        Some(change)
    }

    /// Send `frame` to every subscriber of `topic`. Returns how many accepted it.
    pub fn publish(&self, topic: &str, frame: &OutboundFrame) -> usize {
        let targets: Vec<SocketRef> = match self.topics.get(topic) {
            Some(subscribers) => subscribers.values().cloned().collect(),
            None => return 0,
        };
        let accepted = targets
            .iter()
            .filter(|socket| socket.send(frame.clone()).is_accepted())
            .count();
        debug!(topic, subscribers = targets.len(), accepted, "published");
        accepted
    }

    /// Number of sockets subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |subs| subs.len())
    }

    /// Topics with at least one subscriber, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for TopicHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicHub")
            .field("topics", &self.topics.len())
            .finish()
    }
}
