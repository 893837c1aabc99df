//! Ordered outbound publish queue
//!
//! Holds every message between `publish` and its terminal state (confirmed,
//! or dropped by QoS policy). The head entry doubles as the in-flight entry:
//! at most one publish is outstanding. Delivery outcomes carry the sequence
//! of the send they belong to and only act when it matches the head.
//!
//! The queue itself is not synchronized; the engine keeps it behind a mutex
//! together with the busy flag it carries.

use crate::transport::{QoS, TransportError};
use bytes::Bytes;
use std::collections::VecDeque;

/// One message awaiting delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPublish {
    pub topic: String,
    pub qos: QoS,
    pub retained: bool,
    /// Private copy of the caller's bytes
    pub payload: Bytes,
    /// Position assigned at enqueue time, strictly increasing
    pub sequence: u64,
}

/// Result of offering a message to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended at the tail with this sequence number
    Queued(u64),
    /// QoS 0 while disconnected; nobody to deliver to
    RejectedDisconnected,
    /// QoS 0 while the queue is over its depth bound
    RejectedCapacity,
}

/// Result of one dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing queued
    Idle,
    /// A publish is already outstanding
    Busy,
    /// Queue lock held elsewhere; try again next tick
    Contended,
    /// Head handed to the transport, awaiting confirmation
    InFlight(u64),
    /// QoS 0 head sent and released; no confirmation will follow
    FireAndForget(u64),
    /// Transport refused the head; it stays queued for the next tick
    Rejected(u64),
    /// Transport refused a QoS 0 head; it was discarded
    Abandoned(u64),
}

/// FIFO of pending publishes plus the publisher-busy flag
///
/// `busy` blocks dispatch; `in_flight` records that the head was actually
/// handed to the transport and awaits an outcome. They differ while the
/// connection is down: dispatch is blocked but nothing may be outstanding.
#[derive(Debug)]
pub struct PublishQueue {
    entries: VecDeque<PendingPublish>,
    busy: bool,
    in_flight: bool,
    max_depth: usize,
    next_sequence: u64,
}

impl PublishQueue {
    pub fn new(max_depth: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            busy: false,
            in_flight: false,
            max_depth,
            next_sequence: 0,
        }
    }

    /// Apply the QoS retention policy and append when accepted.
    ///
    /// QoS 0 is refused while disconnected and once the queue is past its
    /// depth bound. QoS 1 and 2 are always accepted; the bound never applies
    /// to them.
    pub fn enqueue(
        &mut self,
        topic: &str,
        qos: QoS,
        retained: bool,
        payload: &[u8],
        connected: bool,
    ) -> EnqueueOutcome {
        if qos == QoS::AtMostOnce {
            if !connected {
                return EnqueueOutcome::RejectedDisconnected;
            }
            if self.entries.len() > self.max_depth {
                return EnqueueOutcome::RejectedCapacity;
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push_back(PendingPublish {
            topic: topic.to_string(),
            qos,
            retained,
            payload: Bytes::copy_from_slice(payload),
            sequence,
        });
        EnqueueOutcome::Queued(sequence)
    }

    /// Hand the head to `send` if the publisher is idle.
    ///
    /// The busy flag is set before `send` runs and cleared again if the send
    /// is refused or needs no confirmation.
    pub fn dispatch_head<F>(&mut self, send: F) -> DispatchOutcome
    where
        F: FnOnce(&PendingPublish) -> Result<(), TransportError>,
    {
        if self.busy {
            return DispatchOutcome::Busy;
        }
        let Some(head) = self.entries.front() else {
            return DispatchOutcome::Idle;
        };

        self.busy = true;
        let sequence = head.sequence;
        let acknowledged = head.qos.is_acknowledged();

        match send(head) {
            Ok(()) if acknowledged => {
                self.in_flight = true;
                DispatchOutcome::InFlight(sequence)
            }
            Ok(()) => {
                self.entries.pop_front();
                self.busy = false;
                DispatchOutcome::FireAndForget(sequence)
            }
            Err(_) if acknowledged => {
                self.busy = false;
                DispatchOutcome::Rejected(sequence)
            }
            Err(_) => {
                self.entries.pop_front();
                self.busy = false;
                DispatchOutcome::Abandoned(sequence)
            }
        }
    }

    /// The send of `sequence` was delivered: release the head and free the
    /// publisher. Returns `None` when `sequence` is not the head in flight
    /// (a stale or duplicate confirmation).
    pub fn on_delivery_confirmed(&mut self, sequence: u64) -> Option<PendingPublish> {
        if !self.owns_outcome(sequence) {
            return None;
        }
        self.in_flight = false;
        self.busy = false;
        self.entries.pop_front()
    }

    /// The send of `sequence` failed: keep the head at the front for a retry.
    /// Returns false when `sequence` is not the head in flight.
    pub fn on_delivery_failed(&mut self, sequence: u64) -> bool {
        if !self.owns_outcome(sequence) {
            return false;
        }
        self.in_flight = false;
        self.busy = false;
        true
    }

    fn owns_outcome(&self, sequence: u64) -> bool {
        self.in_flight && self.entries.front().is_some_and(|head| head.sequence == sequence)
    }

    /// Purge QoS 0 entries, keeping the relative order of the rest.
    /// Returns the number removed.
    pub fn drop_all_qos0(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.qos.is_acknowledged());
        before - self.entries.len()
    }

    /// Block dispatch until [`clear_busy`](Self::clear_busy)
    ///
    /// An outstanding head stays in flight: its confirmation may still
    /// arrive after the link comes back.
    pub fn mark_busy(&mut self) {
        self.busy = true;
    }

    pub fn clear_busy(&mut self) {
        self.busy = false;
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Release every queued payload. Returns how many were discarded.
    pub fn drain(&mut self) -> usize {
        let discarded = self.entries.len();
        self.entries.clear();
        self.busy = false;
        self.in_flight = false;
        discarded
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn front(&self) -> Option<&PendingPublish> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingPublish> {
        self.entries.iter()
    }
}
