//! Pure connection configuration and link tracking for the MQTT transport
//!
//! This module contains pure functions for building rumqttc options, pacing
//! automatic reconnection, deciding which listener notification a session
//! event implies, and matching acknowledgments to the sends they answer.

use crate::config::MqttSection;
use crate::transport::TransportError;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use url::Url;

/// Shortest delay between automatic reconnect attempts
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Automatic reconnect pacing inside a transport session
///
/// Delays start at `min_interval` and double per consecutive failure up to
/// `max_interval`. A zero `max_interval` disables automatic reconnection.
/// No delay is ever shorter than [`MIN_RETRY_DELAY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &MqttSection) -> Self {
        Self {
            min_interval: Duration::from_secs(config.min_retry_interval_secs),
            max_interval: Duration::from_secs(config.max_retry_interval_secs),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.max_interval.is_zero()
    }

    /// Delay before retry number `attempt` (0-based), or `None` when disabled
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if !self.is_enabled() {
            return None;
        }
        let factor = 1u32 << attempt.min(31);
        let delay = self
            .min_interval
            .max(MIN_RETRY_DELAY)
            .checked_mul(factor)
            .unwrap_or(self.max_interval);
        Some(delay.min(self.max_interval).max(MIN_RETRY_DELAY))
    }
}

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(config: &MqttSection) -> Result<MqttOptions, TransportError> {
    let (host, port, tls) = parse_broker_url(&config.broker_url)?;

    let mut mqtt_options = MqttOptions::new(resolve_client_id(config), host, port);

    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(config.keep_alive());
    // Subscriptions are replayed by the engine, so no broker session is resumed.
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}

/// Split a broker URL into host, port and whether TLS is required
pub fn parse_broker_url(broker_url: &str) -> Result<(String, u16, bool), TransportError> {
    let invalid = || TransportError::InvalidBrokerUrl(broker_url.to_string());

    let url = Url::parse(broker_url).map_err(|_| invalid())?;
    let tls = match url.scheme() {
        "mqtt" => false,
        "mqtts" => true,
        _ => return Err(invalid()),
    };
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(invalid)?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok((host.to_string(), port, tls))
}

/// Configured client id, or a fresh random one
pub fn resolve_client_id(config: &MqttSection) -> String {
    match &config.client_id {
        Some(id) => id.clone(),
        None => format!("resilient-mqtt-{}", uuid::Uuid::new_v4().simple()),
    }
}

/// Matches broker acknowledgments to engine publish sequences
///
/// Sends are recorded in the order the engine hands them to rumqttc, and the
/// event loop assigns packet ids in that same order. Publishes rumqttc
/// retransmits after a reconnect keep their packet id and so keep their
/// sequence.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    unassigned: VecDeque<u64>,
    by_pkid: HashMap<u16, u64>,
}

impl DeliveryTracker {
    /// A QoS 1/2 publish with `sequence` was accepted by the client
    pub fn record_send(&mut self, sequence: u64) {
        self.unassigned.push_back(sequence);
    }

    /// The event loop wrote a publish with `pkid` to the network
    pub fn on_publish_sent(&mut self, pkid: u16) {
        if pkid == 0 || self.by_pkid.contains_key(&pkid) {
            return;
        }
        if let Some(sequence) = self.unassigned.pop_front() {
            self.by_pkid.insert(pkid, sequence);
        }
    }

    /// Final outcome for `pkid`; the sequence it carried, if known
    pub fn resolve(&mut self, pkid: u16) -> Option<u64> {
        self.by_pkid.remove(&pkid)
    }

    pub fn outstanding(&self) -> usize {
        self.unassigned.len() + self.by_pkid.len()
    }
}

/// Listener notification implied by a change of link status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNotice {
    Connected,
    ConnectionLost(String),
    ConnectFailed(String),
}

/// Link status as seen by a session task
///
/// `Dropped` means the broker closed the link and the loss was already
/// reported; the poll error that follows must not be reported again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Down,
    Up,
    Dropped,
}

impl LinkState {
    /// ConnAck received
    pub fn on_connack(&mut self) -> LinkNotice {
        *self = LinkState::Up;
        LinkNotice::Connected
    }

    /// Broker sent DISCONNECT
    pub fn on_broker_disconnect(&mut self, reason: &str) -> Option<LinkNotice> {
        match self {
            LinkState::Up => {
                *self = LinkState::Dropped;
                Some(LinkNotice::ConnectionLost(reason.to_string()))
            }
            LinkState::Down | LinkState::Dropped => None,
        }
    }

    /// The event loop returned an error
    pub fn on_poll_error(&mut self, error: &str) -> Option<LinkNotice> {
        let notice = match self {
            LinkState::Up => Some(LinkNotice::ConnectionLost(error.to_string())),
            LinkState::Down => Some(LinkNotice::ConnectFailed(error.to_string())),
            LinkState::Dropped => None,
        };
        *self = LinkState::Down;
        notice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(min: u64, max: u64) -> RetryPolicy {
        RetryPolicy {
            min_interval: Duration::from_secs(min),
            max_interval: Duration::from_secs(max),
        }
    }

    #[test]
    fn test_retry_policy_doubles_up_to_max() {
        let retry = policy(1, 10);
        let delays: Vec<_> = (0..6).filter_map(|n| retry.delay_for(n)).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 10, 10].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn test_retry_policy_large_attempt_saturates() {
        let retry = policy(1, 60);
        assert_eq!(retry.delay_for(500), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_retry_policy_disabled() {
        let retry = policy(1, 0);
        assert!(!retry.is_enabled());
        assert_eq!(retry.delay_for(0), None);
    }

    #[test]
    fn test_retry_policy_never_returns_zero_delay() {
        let retry = policy(0, 60);
        for attempt in [0, 1, 5, 40] {
            let delay = retry.delay_for(attempt).unwrap();
            assert!(delay >= MIN_RETRY_DELAY, "attempt {attempt} gave {delay:?}");
        }
        assert_eq!(retry.delay_for(1), Some(MIN_RETRY_DELAY * 2));
    }

    #[test]
    fn test_tracker_ties_acks_to_sequences() {
        let mut tracker = DeliveryTracker::default();
        tracker.record_send(4);
        tracker.on_publish_sent(0);
        tracker.on_publish_sent(1);
        tracker.record_send(5);
        tracker.on_publish_sent(2);

        assert_eq!(tracker.resolve(1), Some(4));
        assert_eq!(tracker.resolve(1), None);
        assert_eq!(tracker.resolve(2), Some(5));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_tracker_keeps_sequence_for_retransmission() {
        let mut tracker = DeliveryTracker::default();
        tracker.record_send(0);
        tracker.on_publish_sent(1);
        // Engine re-dispatches the same head after reconnecting
        tracker.record_send(0);
        // rumqttc retransmits packet 1, then writes the new send as packet 2
        tracker.on_publish_sent(1);
        tracker.on_publish_sent(2);

        assert_eq!(tracker.resolve(1), Some(0));
        assert_eq!(tracker.resolve(2), Some(0));
        assert_eq!(tracker.resolve(3), None);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let mut config = MqttSection::with_broker("mqtt://localhost");
        config.min_retry_interval_secs = 2;
        config.max_retry_interval_secs = 30;
        assert_eq!(RetryPolicy::from_config(&config), policy(2, 30));
    }

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("mqtt://broker.local").unwrap(),
            ("broker.local".to_string(), 1883, false)
        );
        assert_eq!(
            parse_broker_url("mqtts://broker.local").unwrap(),
            ("broker.local".to_string(), 8883, true)
        );
        assert_eq!(
            parse_broker_url("mqtt://127.0.0.1:2883").unwrap(),
            ("127.0.0.1".to_string(), 2883, false)
        );
    }

    #[test]
    fn test_invalid_broker_url() {
        for url in ["invalid-url", "http://broker.local", "mqtt://"] {
            assert!(
                matches!(parse_broker_url(url), Err(TransportError::InvalidBrokerUrl(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let mut config = MqttSection::with_broker("mqtt://localhost:1883");
        config.client_id = Some("device-7".to_string());

        let options = configure_mqtt_options(&config).unwrap();
        assert_eq!(options.client_id(), "device-7");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(20));
        assert!(options.clean_start());
    }

    #[test]
    fn test_generated_client_ids_are_unique() {
        let config = MqttSection::with_broker("mqtt://localhost");
        let first = resolve_client_id(&config);
        assert!(first.starts_with("resilient-mqtt-"));
        assert_ne!(first, resolve_client_id(&config));
    }

    #[test]
    fn test_link_reports_connect_failure_before_first_connack() {
        let mut link = LinkState::default();
        assert_eq!(
            link.on_poll_error("refused"),
            Some(LinkNotice::ConnectFailed("refused".to_string()))
        );
        assert_eq!(link, LinkState::Down);
    }

    #[test]
    fn test_link_reports_loss_once() {
        let mut link = LinkState::default();
        assert_eq!(link.on_connack(), LinkNotice::Connected);
        assert_eq!(
            link.on_broker_disconnect("server shutting down"),
            Some(LinkNotice::ConnectionLost("server shutting down".to_string()))
        );
        assert_eq!(link.on_poll_error("connection closed"), None);
        assert_eq!(
            link.on_poll_error("connection refused"),
            Some(LinkNotice::ConnectFailed("connection refused".to_string()))
        );
    }

    #[test]
    fn test_link_poll_error_while_up_is_loss() {
        let mut link = LinkState::default();
        link.on_connack();
        assert_eq!(
            link.on_poll_error("reset"),
            Some(LinkNotice::ConnectionLost("reset".to_string()))
        );
    }
}
