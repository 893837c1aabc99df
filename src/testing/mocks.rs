//! Mock implementations for testing
//!
//! [`MockTransport`] records every request the engine makes and lets a test
//! fire each transport notification by hand, so connection-state transitions
//! can be driven deterministically without a broker.

use crate::engine::PendingPublish;
use crate::transport::{QoS, Transport, TransportError, TransportListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// One request observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect,
    Subscribe(String, QoS),
    Unsubscribe(String),
    Send(PendingPublish),
    Disconnect,
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    listener: Mutex<Option<Weak<dyn TransportListener>>>,
    calls: Mutex<Vec<TransportCall>>,
    reject_connect: AtomicBool,
    reject_send: AtomicBool,
    rejected_sends: AtomicUsize,
    subscribe_budget: Mutex<Option<usize>>,
    last_sent: Mutex<Option<u64>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connect()` fail synchronously
    pub fn set_reject_connect(&self, reject: bool) {
        self.reject_connect.store(reject, Ordering::SeqCst);
    }

    /// Make `send()` fail synchronously
    pub fn set_reject_send(&self, reject: bool) {
        self.reject_send.store(reject, Ordering::SeqCst);
    }

    /// Accept only this many more subscribes, like a full request channel.
    /// `None` accepts everything.
    pub fn set_subscribe_budget(&self, budget: Option<usize>) {
        *self
            .subscribe_budget
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = budget;
    }

    fn lock_calls(&self) -> MutexGuard<'_, Vec<TransportCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: TransportCall) {
        self.lock_calls().push(call);
    }

    // The listener is cloned out before use: it calls back into the transport.
    fn listener(&self) -> Option<Arc<dyn TransportListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub fn has_listener(&self) -> bool {
        self.listener().is_some()
    }

    /// Report a successful (re)connection
    pub fn complete_connect(&self) {
        if let Some(listener) = self.listener() {
            listener.on_connected();
        }
    }

    /// Report a failed connection attempt
    pub fn fail_connect(&self, reason: &str) {
        if let Some(listener) = self.listener() {
            listener.on_connect_failed(reason);
        }
    }

    /// Report loss of an established connection
    pub fn drop_connection(&self, cause: &str) {
        if let Some(listener) = self.listener() {
            listener.on_connection_lost(cause);
        }
    }

    /// Deliver an inbound message
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        if let Some(listener) = self.listener() {
            listener.on_message_arrived(topic, payload);
        }
    }

    fn last_sent(&self) -> Option<u64> {
        *self.last_sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Confirm the most recent send
    pub fn ack_delivery(&self) {
        if let Some(sequence) = self.last_sent() {
            self.ack_sequence(sequence);
        }
    }

    /// Confirm the send of `sequence`, whether or not it is still in flight
    pub fn ack_sequence(&self, sequence: u64) {
        if let Some(listener) = self.listener() {
            listener.on_delivery_succeeded(sequence);
        }
    }

    /// Fail the most recent send
    pub fn fail_delivery(&self, reason: &str) {
        if let Some(sequence) = self.last_sent() {
            self.fail_sequence(sequence, reason);
        }
    }

    /// Fail the send of `sequence`
    pub fn fail_sequence(&self, sequence: u64, reason: &str) {
        if let Some(listener) = self.listener() {
            listener.on_delivery_failed(sequence, reason);
        }
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock_calls().clone()
    }

    /// Messages accepted by `send()`, in order
    pub fn sent(&self) -> Vec<PendingPublish> {
        self.lock_calls()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Send(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn subscribed(&self) -> Vec<(String, QoS)> {
        self.lock_calls()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Subscribe(topic, qos) => Some((topic.clone(), *qos)),
                _ => None,
            })
            .collect()
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.lock_calls()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Unsubscribe(topic) => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn connect_calls(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::Connect))
    }

    pub fn disconnect_calls(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::Disconnect))
    }

    pub fn rejected_sends(&self) -> usize {
        self.rejected_sends.load(Ordering::SeqCst)
    }

    fn count(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        self.lock_calls().iter().filter(|call| predicate(call)).count()
    }

    pub fn clear_history(&self) {
        self.lock_calls().clear();
    }
}

impl Transport for MockTransport {
    fn set_listener(&self, listener: Weak<dyn TransportListener>) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn clear_listener(&self) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn connect(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Connect);
        if self.reject_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("mock connect failure".to_string()));
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        {
            let mut budget = self
                .subscribe_budget
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match budget.as_mut() {
                Some(0) => return Err(TransportError::Rejected("request channel full".to_string())),
                Some(remaining) => *remaining -= 1,
                None => {}
            }
        }
        self.record(TransportCall::Subscribe(topic.to_string(), qos));
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.record(TransportCall::Unsubscribe(topic.to_string()));
        Ok(())
    }

    fn send(&self, message: &PendingPublish) -> Result<(), TransportError> {
        if self.reject_send.load(Ordering::SeqCst) {
            self.rejected_sends.fetch_add(1, Ordering::SeqCst);
            return Err(TransportError::NotConnected);
        }
        self.record(TransportCall::Send(message.clone()));
        *self.last_sent.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.sequence);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Disconnect);
        Ok(())
    }
}
