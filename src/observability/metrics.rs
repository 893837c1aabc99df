//! Thread-safe engine counters
//!
//! Counters are bumped from both the driver context and the transport's
//! notification context, so every field is a relaxed atomic.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-engine operational counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    // Publish path
    publishes_enqueued: AtomicU64,
    publishes_delivered: AtomicU64,
    dropped_disconnected: AtomicU64,
    dropped_capacity: AtomicU64,
    dropped_on_reconnect: AtomicU64,
    send_rejections: AtomicU64,
    delivery_failures: AtomicU64,

    // Connection lifecycle
    connect_attempts: AtomicU64,
    connections_established: AtomicU64,
    connect_failures: AtomicU64,
    connections_lost: AtomicU64,

    // Inbound path
    messages_received: AtomicU64,
    messages_unmatched: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub publishes_enqueued: u64,
    pub publishes_delivered: u64,
    pub dropped_disconnected: u64,
    pub dropped_capacity: u64,
    pub dropped_on_reconnect: u64,
    pub send_rejections: u64,
    pub delivery_failures: u64,
    pub connect_attempts: u64,
    pub connections_established: u64,
    pub connect_failures: u64,
    pub connections_lost: u64,
    pub messages_received: u64,
    pub messages_unmatched: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        bump(&self.publishes_enqueued);
    }

    pub fn record_delivered(&self) {
        bump(&self.publishes_delivered);
    }

    pub fn record_dropped_disconnected(&self) {
        bump(&self.dropped_disconnected);
    }

    pub fn record_dropped_capacity(&self) {
        bump(&self.dropped_capacity);
    }

    pub fn record_dropped_on_reconnect(&self, count: usize) {
        self.dropped_on_reconnect
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_send_rejected(&self) {
        bump(&self.send_rejections);
    }

    pub fn record_delivery_failed(&self) {
        bump(&self.delivery_failures);
    }

    pub fn record_connect_attempt(&self) {
        bump(&self.connect_attempts);
    }

    pub fn record_connected(&self) {
        bump(&self.connections_established);
    }

    pub fn record_connect_failed(&self) {
        bump(&self.connect_failures);
    }

    pub fn record_connection_lost(&self) {
        bump(&self.connections_lost);
    }

    pub fn record_message_received(&self, matched: bool) {
        bump(&self.messages_received);
        if !matched {
            bump(&self.messages_unmatched);
        }
    }

    /// Take a consistent-enough snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            publishes_enqueued: load(&self.publishes_enqueued),
            publishes_delivered: load(&self.publishes_delivered),
            dropped_disconnected: load(&self.dropped_disconnected),
            dropped_capacity: load(&self.dropped_capacity),
            dropped_on_reconnect: load(&self.dropped_on_reconnect),
            send_rejections: load(&self.send_rejections),
            delivery_failures: load(&self.delivery_failures),
            connect_attempts: load(&self.connect_attempts),
            connections_established: load(&self.connections_established),
            connect_failures: load(&self.connect_failures),
            connections_lost: load(&self.connections_lost),
            messages_received: load(&self.messages_received),
            messages_unmatched: load(&self.messages_unmatched),
        }
    }
}

impl MetricsSnapshot {
    /// Total publishes discarded for any reason
    pub fn total_dropped(&self) -> u64 {
        self.dropped_disconnected + self.dropped_capacity + self.dropped_on_reconnect
    }
}
