//! Integration tests for startup while the broker is unreachable
//!
//! Uses the real rumqttc transport against a local port nothing listens on:
//! - connect failures come back through the listener, never as errors
//! - the engine waits out its tick window before asking again
//! - reliable publishes stay queued throughout

use resilient_mqtt::{
    ClientConfig, ConnectionState, EngineConfig, MqttSection, QoS, ResilientClient, TickOutcome,
};
use std::time::Duration;

fn unreachable_config(reconnect_delay_ticks: u32) -> ClientConfig {
    let mut mqtt = MqttSection::with_broker("mqtt://127.0.0.1:1");
    mqtt.client_id = Some("broker-down-test".to_string());
    // Leave reconnection pacing to the engine
    mqtt.max_retry_interval_secs = 0;

    ClientConfig {
        mqtt,
        engine: EngineConfig {
            reconnect_delay_ticks,
            ..EngineConfig::default()
        },
    }
}

async fn wait_for_connect_failures<T: resilient_mqtt::Transport>(
    client: &ResilientClient<T>,
    expected: u64,
) {
    for _ in 0..100 {
        if client.metrics().connect_failures >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("connect failure was never reported");
}

#[tokio::test]
async fn test_engine_backs_off_when_broker_unavailable_at_startup() {
    let config = unreachable_config(2);
    let client = ResilientClient::from_config(&config, tokio::runtime::Handle::current())
        .expect("client creation should succeed even if broker is down");

    assert_eq!(client.poll_once(), TickOutcome::ConnectRequested);
    wait_for_connect_failures(&client, 1).await;
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    assert_eq!(client.poll_once(), TickOutcome::BackingOff { remaining: 1 });
    assert_eq!(client.poll_once(), TickOutcome::BackingOff { remaining: 0 });
    assert_eq!(client.poll_once(), TickOutcome::ConnectRequested);
    wait_for_connect_failures(&client, 2).await;

    assert_eq!(client.metrics().connect_attempts, 2);
    assert_eq!(client.metrics().connections_established, 0);
    client.shutdown();
}

#[tokio::test]
async fn test_publishes_while_broker_down_follow_qos_policy() {
    let config = unreachable_config(60);
    let client =
        ResilientClient::from_config(&config, tokio::runtime::Handle::current()).unwrap();

    client.poll_once();
    wait_for_connect_failures(&client, 1).await;

    client.publish("/alive/string", QoS::ExactlyOnce, false, b"i am alive!");
    client.publish("/alive/json", QoS::ExactlyOnce, false, br#"{"cmd":"alive"}"#);
    client.publish("/echo/back", QoS::AtMostOnce, false, b"dropped");

    let topics: Vec<_> = client
        .queued_messages()
        .into_iter()
        .map(|(topic, _)| topic)
        .collect();
    assert_eq!(topics, vec!["/alive/string", "/alive/json"]);
    assert_eq!(client.metrics().dropped_disconnected, 1);
}

#[tokio::test]
async fn test_invalid_broker_url_rejected_at_construction() {
    let mut config = unreachable_config(60);
    config.mqtt.broker_url = "ws://127.0.0.1:1883".to_string();

    let result = ResilientClient::from_config(&config, tokio::runtime::Handle::current());
    assert!(result.is_err());
}
