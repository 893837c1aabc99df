//! Transport notification handling
//!
//! The engine core is the single [`TransportListener`] of its transport.
//! Everything here runs on the transport's context, concurrently with the
//! driver, so queue work takes the (blocking) queue lock and user callbacks
//! are invoked only after the registry lock has been released.

use super::{ConnectionState, EngineCore};
use crate::transport::{QoS, Transport, TransportListener};
use tracing::{debug, info, warn};

impl<T: Transport> EngineCore<T> {
    /// Re-issue every registered subscription against the transport.
    /// Topics the transport refuses are left pending for the poll driver.
    fn replay_subscriptions(&self) -> (usize, usize) {
        let replay = self.lock_registry().replay_list();
        let refused = self.issue_subscribes(&replay);
        (replay.len(), refused)
    }

    /// Subscribe each `(topic, qos)`; refused topics are marked pending.
    /// Returns how many were refused.
    pub(super) fn issue_subscribes(&self, topics: &[(String, QoS)]) -> usize {
        let mut refused = Vec::new();
        for (topic, qos) in topics {
            match self.transport.subscribe(topic, *qos) {
                Ok(()) => debug!(topic = %topic, ?qos, "Re-subscribed"),
                Err(e) => {
                    debug!(topic = %topic, "Subscribe deferred to next tick: {}", e);
                    refused.push(topic.as_str());
                }
            }
        }

        if !refused.is_empty() {
            let mut registry = self.lock_registry();
            for topic in &refused {
                registry.mark_pending(topic);
            }
        }
        refused.len()
    }
}

impl<T: Transport> TransportListener for EngineCore<T> {
    fn on_connected(&self) {
        let Some(previous) = self.state.transition(ConnectionState::Connected) else {
            return;
        };
        let _span = crate::engine_span!(op = "connected").entered();
        self.metrics.record_connected();

        let (resubscribed, deferred) = self.replay_subscriptions();

        let purged = {
            let mut queue = self.lock_queue();
            let purged = queue.drop_all_qos0();
            queue.clear_busy();
            purged
        };
        self.metrics.record_dropped_on_reconnect(purged);

        if deferred > 0 {
            warn!(deferred, "Transport refused some re-subscribes, retrying on next tick");
        }
        info!(
            ?previous,
            resubscribed, purged, "Connected to MQTT broker"
        );
    }

    fn on_connection_lost(&self, cause: &str) {
        let Some(previous) = self.state.transition(ConnectionState::Disconnected) else {
            return;
        };
        // Keep the driver away from the stale connection until the next connect.
        self.lock_queue().mark_busy();
        self.lock_registry().clear_pending();

        if previous == ConnectionState::Connected {
            self.metrics.record_connection_lost();
            warn!("MQTT connection lost: {}", cause);
        } else {
            debug!(?previous, "Connection lost while not connected: {}", cause);
        }
    }

    fn on_connect_failed(&self, reason: &str) {
        if self.state.transition(ConnectionState::Disconnected).is_none() {
            return;
        }
        self.countdown.reset();
        self.metrics.record_connect_failed();
        warn!(
            retry_in_ticks = self.countdown.remaining(),
            "Connect to MQTT broker failed: {}", reason
        );
    }

    fn on_message_arrived(&self, topic: &str, payload: &[u8]) {
        if self.is_shut_down() {
            return;
        }
        let callback = self.lock_registry().callback_for(topic);
        self.metrics.record_message_received(callback.is_some());

        match callback {
            Some(callback) => callback(payload),
            None => debug!(topic, "No subscription for inbound message, discarded"),
        }
    }

    fn on_delivery_succeeded(&self, sequence: u64) {
        if self.is_shut_down() {
            return;
        }
        let delivered = self.lock_queue().on_delivery_confirmed(sequence);
        match delivered {
            Some(message) => {
                self.metrics.record_delivered();
                debug!(topic = %message.topic, sequence, "Publish delivered");
            }
            None => warn!(sequence, "Delivery confirmation not for the publish in flight, ignored"),
        }
    }

    fn on_delivery_failed(&self, sequence: u64, reason: &str) {
        if self.is_shut_down() {
            return;
        }
        if self.lock_queue().on_delivery_failed(sequence) {
            self.metrics.record_delivery_failed();
            warn!(sequence, "Publish delivery failed, retrying next tick: {}", reason);
        } else {
            warn!(
                sequence,
                "Delivery failure not for the publish in flight, ignored: {}", reason
            );
        }
    }
}
