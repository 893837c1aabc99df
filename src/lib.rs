//! Resilient MQTT - self-healing publish/subscribe over an unreliable broker link
//!
//! Applications subscribe and publish as if the broker were always reachable.
//! The engine remembers subscriptions and replays them on every reconnection,
//! buffers outbound messages in order, drops fire-and-forget (QoS 0) traffic
//! that cannot be delivered promptly, and keeps at-least-once and exactly-once
//! traffic until the broker confirms it.
//!
//! # Overview
//!
//! - [`engine`] - the [`ResilientClient`] facade, publish queue, subscription
//!   registry and connection state machine
//! - [`transport`] - the [`Transport`] seam and the rumqttc-backed [`MqttTransport`]
//! - [`config`] - TOML configuration
//! - [`observability`] - tracing setup and engine counters
//! - [`testing`] - a scriptable mock transport
//!
//! # Quick Start
//!
//! ```rust
//! use resilient_mqtt::testing::MockTransport;
//! use resilient_mqtt::{EngineConfig, QoS, ResilientClient, TickOutcome};
//!
//! let client = ResilientClient::new(MockTransport::new(), &EngineConfig::default());
//! client.subscribe("/echo", QoS::AtMostOnce, |payload| {
//!     println!("{}", String::from_utf8_lossy(payload));
//! });
//! client.publish("/alive/string", QoS::ExactlyOnce, false, b"i am alive!");
//!
//! // Nothing is lost while the broker is unreachable
//! assert_eq!(client.poll_once(), TickOutcome::ConnectRequested);
//! assert_eq!(client.queue_len(), 1);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod observability;
pub mod testing;
pub mod transport;

pub use config::{ClientConfig, ConfigError, EngineConfig, MqttSection};
pub use engine::{ConnectionState, Publisher, ResilientClient, TickOutcome};
pub use error::{ClientError, ClientResult};
pub use observability::MetricsSnapshot;
pub use transport::mqtt::MqttTransport;
pub use transport::{QoS, Transport, TransportError, TransportListener};
