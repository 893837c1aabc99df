//! Topic filter to callback registry
//!
//! Keyed by the exact filter string; registering the same filter again
//! replaces the earlier entry. Lookups on message arrival are exact string
//! matches, any wildcard expansion happens in the broker/transport.
//!
//! Topics whose subscribe request the transport refused while connected are
//! kept in a pending set until a later tick re-issues them.

use crate::transport::QoS;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Callback invoked with the payload of every message on a subscribed topic
pub type MessageCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A registered interest in a topic
#[derive(Clone)]
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
    pub callback: MessageCallback,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: BTreeMap<String, Subscription>,
    pending: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the subscription for `topic`.
    /// Returns the entry it replaced, if any.
    pub fn upsert(
        &mut self,
        topic: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Option<Subscription> {
        self.pending.remove(topic);
        self.entries.insert(
            topic.to_string(),
            Subscription {
                topic: topic.to_string(),
                qos,
                callback,
            },
        )
    }

    pub fn remove(&mut self, topic: &str) -> Option<Subscription> {
        self.pending.remove(topic);
        self.entries.remove(topic)
    }

    /// Callback registered for exactly this topic
    pub fn callback_for(&self, topic: &str) -> Option<MessageCallback> {
        self.entries.get(topic).map(|sub| Arc::clone(&sub.callback))
    }

    /// `(topic, qos)` for every registration, in topic order, for replay
    pub fn replay_list(&self) -> Vec<(String, QoS)> {
        self.entries
            .values()
            .map(|sub| (sub.topic.clone(), sub.qos))
            .collect()
    }

    /// Remember that the broker does not yet hold a subscription for `topic`
    pub fn mark_pending(&mut self, topic: &str) {
        if self.entries.contains_key(topic) {
            self.pending.insert(topic.to_string());
        }
    }

    /// Drain the pending set as `(topic, qos)` with the current registration
    pub fn take_pending(&mut self) -> Vec<(String, QoS)> {
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .filter_map(|topic| self.entries.get(&topic).map(|sub| (topic, sub.qos)))
            .collect()
    }

    /// Forget owed subscribes; the next connection replays everything anyway
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
    }
}
