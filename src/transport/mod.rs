//! Transport layer underneath the resilient client
//!
//! This module provides the transport abstraction the engine drives and the
//! rumqttc-backed implementation used in production. The engine only ever
//! talks to a [`Transport`]; outcomes flow back through a [`TransportListener`].

use crate::engine::PendingPublish;
use serde::{Deserialize, Serialize};
use std::sync::Weak;
use thiserror::Error;

pub mod mqtt;

/// MQTT quality-of-service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// Best effort, no acknowledgment
    AtMostOnce = 0,
    /// Acknowledged by the broker, may be duplicated
    AtLeastOnce = 1,
    /// Four-way handshake, delivered exactly once
    ExactlyOnce = 2,
}

impl QoS {
    /// True for levels where the transport reports a delivery outcome
    pub fn is_acknowledged(self) -> bool {
        self != QoS::AtMostOnce
    }
}

impl TryFrom<u8> for QoS {
    type Error = crate::error::ClientError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(crate::error::ClientError::InvalidQos(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}

impl From<QoS> for rumqttc::v5::mqttbytes::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::v5::mqttbytes::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::v5::mqttbytes::QoS::ExactlyOnce,
        }
    }
}

/// Synchronous rejections raised by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,
    #[error("Request rejected by transport: {0}")]
    Rejected(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Transport client error")]
    Client(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Notifications a transport delivers back to its owner
///
/// Implementations are invoked from the transport's own execution context,
/// possibly a different thread than the one driving the engine.
pub trait TransportListener: Send + Sync {
    /// A connection (or automatic reconnection) was established
    fn on_connected(&self);

    /// An established connection dropped
    fn on_connection_lost(&self, cause: &str);

    /// A connection attempt did not succeed
    fn on_connect_failed(&self, reason: &str);

    /// A message arrived on a subscribed topic
    fn on_message_arrived(&self, topic: &str, payload: &[u8]);

    /// The broker acknowledged the send of the publish with this sequence
    ///
    /// The sequence is the delivery token: it identifies which send the
    /// acknowledgment belongs to, so a late or duplicate one can be told apart
    /// from the outcome of the publish currently in flight.
    fn on_delivery_succeeded(&self, sequence: u64);

    /// The broker refused the send of the publish with this sequence
    fn on_delivery_failed(&self, sequence: u64, reason: &str);
}

/// Non-blocking transport driven by the engine
///
/// Every method returns immediately. `Err` means the request was refused
/// synchronously; asynchronous outcomes are reported to the registered
/// [`TransportListener`].
pub trait Transport: Send + Sync + 'static {
    /// Register the receiver for all notifications
    fn set_listener(&self, listener: Weak<dyn TransportListener>);

    /// Silence notifications; nothing is delivered after this returns
    fn clear_listener(&self);

    /// Start an asynchronous connection attempt
    fn connect(&self) -> Result<(), TransportError>;

    /// Request a subscription on the broker
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    /// Remove a subscription on the broker
    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Hand one message to the transport for delivery
    ///
    /// For QoS 1/2 the outcome is reported with `message.sequence`.
    fn send(&self, message: &PendingPublish) -> Result<(), TransportError>;

    /// Tear down the connection and any background work
    fn disconnect(&self) -> Result<(), TransportError>;
}
