//! Configuration loading and validation tests
//!
//! Tests focus on observable outcomes of loading files from disk: defaults,
//! validation failures and error variants.

use resilient_mqtt::config::{ClientConfig, ConfigError, EngineConfig};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{contents}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtts://broker.example.com:8883"
client_id = "rover-2"
username_env = "MQTT_USER"
password_env = "MQTT_PASS"
keep_alive_secs = 15
min_retry_interval_secs = 1
max_retry_interval_secs = 0

[engine]
reconnect_delay_ticks = 30
queue_depth = 64
poll_interval_ms = 50
"#,
    );

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.mqtt.broker_url, "mqtts://broker.example.com:8883");
    assert_eq!(config.mqtt.client_id.as_deref(), Some("rover-2"));
    assert_eq!(config.mqtt.username_env.as_deref(), Some("MQTT_USER"));
    assert_eq!(config.mqtt.keep_alive(), Duration::from_secs(15));
    assert_eq!(config.mqtt.max_retry_interval_secs, 0);
    assert_eq!(
        config.engine,
        EngineConfig {
            reconnect_delay_ticks: 30,
            queue_depth: 64,
            poll_interval_ms: 50,
        }
    );
}

#[test]
fn test_engine_section_is_optional() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtt://127.0.0.1:1883"
"#,
    );

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.engine, EngineConfig::default());
    assert_eq!(config.engine.poll_interval(), Duration::from_millis(100));
}

#[test]
fn test_missing_file_is_file_read_error() {
    let result = ClientConfig::load_from_file(Path::new("/nonexistent/mqtt-demo.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let temp_file = write_config("[mqtt\nbroker_url = ");
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_broker_url_is_parse_error() {
    let temp_file = write_config("[mqtt]\nclient_id = \"x\"\n");
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let cases = [
        "[mqtt]\nbroker_url = \"tcp://localhost:1883\"\n",
        "[mqtt]\nbroker_url = \"mqtt://localhost\"\n[engine]\nqueue_depth = 0\n",
        "[mqtt]\nbroker_url = \"mqtt://localhost\"\n[engine]\npoll_interval_ms = 0\n",
        "[mqtt]\nbroker_url = \"mqtt://localhost\"\nmin_retry_interval_secs = 10\nmax_retry_interval_secs = 5\n",
        "[mqtt]\nbroker_url = \"mqtt://localhost\"\nmin_retry_interval_secs = 0\nmax_retry_interval_secs = 60\n",
    ];

    for contents in cases {
        let temp_file = write_config(contents);
        let result = ClientConfig::load_from_file(temp_file.path());
        assert!(
            matches!(result, Err(ConfigError::InvalidConfig(_))),
            "expected InvalidConfig for:\n{contents}"
        );
    }
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = ClientConfig::for_broker("mqtt://10.0.0.5:1883");
    let rendered = toml::to_string_pretty(&config).unwrap();
    let temp_file = write_config(&rendered);

    assert_eq!(ClientConfig::load_from_file(temp_file.path()).unwrap(), config);
}
