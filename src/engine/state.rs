//! Connection state and reconnect pacing
//!
//! The state lives in a single atomic word because it is written from the
//! transport's notification context and read on every poll tick. Transitions
//! are plain stores except where a compare-and-swap keeps a late notification
//! from resurrecting a shut-down engine.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Connectivity of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection; the poll driver counts down and then retries
    Disconnected,
    /// A connect request is outstanding with the transport
    Connecting,
    /// Broker reachable; queued publishes are dispatched
    Connected,
    /// Explicitly shut down, terminal
    Shutdown,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Shutdown => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Shutdown,
        }
    }
}

/// Atomic holder for [`ConnectionState`]
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(initial: ConnectionState) -> Self {
        Self(AtomicU8::new(initial.as_u8()))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` unless the engine has been shut down.
    /// Returns the previous state, or `None` if the cell is terminal.
    pub fn transition(&self, next: ConnectionState) -> Option<ConnectionState> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if ConnectionState::from_u8(current) == ConnectionState::Shutdown {
                return None;
            }
            match self.0.compare_exchange_weak(
                current,
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return Some(ConnectionState::from_u8(previous)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Move from exactly `from` to `to`; false if the state was anything else
    pub fn transition_from(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter the terminal state, returning the state it replaced
    pub fn shutdown(&self) -> ConnectionState {
        ConnectionState::from_u8(
            self.0
                .swap(ConnectionState::Shutdown.as_u8(), Ordering::AcqRel),
        )
    }
}

/// Poll-tick countdown that spaces out connect attempts
#[derive(Debug)]
pub struct ReconnectCountdown {
    remaining: AtomicU32,
    window: u32,
}

impl ReconnectCountdown {
    /// Countdown that starts elapsed, so the first tick connects immediately
    pub fn new(window: u32) -> Self {
        Self {
            remaining: AtomicU32::new(0),
            window,
        }
    }

    /// Restart the full backoff window
    pub fn reset(&self) {
        self.remaining.store(self.window, Ordering::Release);
    }

    /// Consume one tick. Returns true when the window has elapsed and a
    /// connect attempt may proceed.
    pub fn tick(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err()
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }
}
