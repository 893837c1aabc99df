//! Testing utilities and mock implementations
//!
//! Provides a scriptable transport so the engine can be exercised without an
//! MQTT broker.

pub mod mocks;

pub use mocks::*;
