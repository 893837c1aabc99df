//! Pure routing of rumqttc events
//!
//! Each event polled from the rumqttc event loop is classified into a
//! [`SessionEvent`] without side effects; the session task acts on the result.
//! Outbound publishes and their acknowledgments keep their packet id so the
//! session can tie each outcome to the send it belongs to.

use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{Packet, PubAckReason, PubCompReason, PubRecReason};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// What a rumqttc event means for the engine
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// ConnAck received; refusals never get here, they fail the poll instead
    ConnectionAcknowledged,
    /// Publish received on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// A publish went out on the wire with this packet id (0 for QoS 0)
    PublishSent(u16),
    /// Final acknowledgment of an outbound QoS 1/2 publish
    DeliveryConfirmed(u16),
    /// The broker refused an outbound QoS 1/2 publish
    DeliveryFailed { pkid: u16, reason: String },
    /// The broker closed the connection
    BrokerDisconnect(String),
    /// Pings, other outgoing packets and protocol chatter
    Ignored,
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to the action the session must take (pure routing decision)
    pub fn route_event(event: &Event) -> SessionEvent {
        let packet = match event {
            Event::Incoming(packet) => packet,
            Event::Outgoing(Outgoing::Publish(pkid)) => return SessionEvent::PublishSent(*pkid),
            Event::Outgoing(_) => return SessionEvent::Ignored,
        };

        match packet {
            // rumqttc turns a refusing ConnAck into a poll error
            Packet::ConnAck(_) => SessionEvent::ConnectionAcknowledged,
            Packet::Publish(publish) => SessionEvent::MessageReceived {
                topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                payload: publish.payload.clone(),
            },
            Packet::PubAck(puback) => match &puback.reason {
                PubAckReason::Success | PubAckReason::NoMatchingSubscribers => {
                    SessionEvent::DeliveryConfirmed(puback.pkid)
                }
                reason => SessionEvent::DeliveryFailed {
                    pkid: puback.pkid,
                    reason: format!("PUBACK {reason:?}"),
                },
            },
            Packet::PubRec(pubrec) => match &pubrec.reason {
                PubRecReason::Success | PubRecReason::NoMatchingSubscribers => {
                    SessionEvent::Ignored
                }
                reason => SessionEvent::DeliveryFailed {
                    pkid: pubrec.pkid,
                    reason: format!("PUBREC {reason:?}"),
                },
            },
            Packet::PubComp(pubcomp) => match &pubcomp.reason {
                PubCompReason::Success => SessionEvent::DeliveryConfirmed(pubcomp.pkid),
                reason => SessionEvent::DeliveryFailed {
                    pkid: pubcomp.pkid,
                    reason: format!("PUBCOMP {reason:?}"),
                },
            },
            Packet::Disconnect(disconnect) => {
                SessionEvent::BrokerDisconnect(format!("{:?}", disconnect.reason_code))
            }
            _ => SessionEvent::Ignored,
        }
    }
}
