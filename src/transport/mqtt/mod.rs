//! MQTT v5 transport built on rumqttc
//!
//! This module separates pure functions from I/O for testability.
//!
//! # Architecture
//!
//! - [`connection`] - Option building, broker URL parsing, retry pacing and link tracking
//! - [`message_handler`] - Pure classification of rumqttc events
//! - [`client`] - The [`MqttTransport`] and its session task
//!
//! # Usage
//!
//! ```rust,no_run
//! use resilient_mqtt::config::MqttSection;
//! use resilient_mqtt::transport::mqtt::MqttTransport;
//! use resilient_mqtt::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection::with_broker("mqtt://localhost:1883");
//! let transport = MqttTransport::new(config, tokio::runtime::Handle::current())?;
//! transport.connect()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, LinkNotice, LinkState, RetryPolicy};
pub use message_handler::{MessageHandler, SessionEvent};
