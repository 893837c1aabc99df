//! Configuration for the resilient MQTT client
//!
//! Loaded from a TOML file with two sections: `[mqtt]` describes how the
//! transport reaches the broker, `[engine]` tunes reconnection pacing and the
//! outbound queue. Credentials are referenced by environment variable name and
//! resolved when a connection is attempted, never stored in the file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Top-level client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub mqtt: MqttSection,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtt://host:port` or `mqtts://host:port`
    pub broker_url: String,
    /// Client identifier; a random one is generated when absent
    #[serde(default)]
    pub client_id: Option<String>,
    /// Environment variable containing username
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable containing password
    #[serde(default)]
    pub password_env: Option<String>,
    /// Keep-alive interval in seconds (default: 20)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Initial delay between automatic reconnect attempts (default: 1)
    #[serde(default = "default_min_retry_interval")]
    pub min_retry_interval_secs: u64,
    /// Upper bound for the reconnect delay; 0 disables automatic reconnect (default: 60)
    #[serde(default = "default_max_retry_interval")]
    pub max_retry_interval_secs: u64,
}

fn default_keep_alive() -> u64 {
    20
}

fn default_min_retry_interval() -> u64 {
    1
}

fn default_max_retry_interval() -> u64 {
    60
}

impl MqttSection {
    /// Section pointing at a broker with every other field defaulted
    pub fn with_broker(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            client_id: None,
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive(),
            min_retry_interval_secs: default_min_retry_interval(),
            max_retry_interval_secs: default_max_retry_interval(),
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Resolve the username from its environment variable
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_ref())
    }

    /// Resolve the password from its environment variable
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_ref())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.broker_url).map_err(|e| {
            ConfigError::InvalidConfig(format!("broker_url '{}': {e}", self.broker_url))
        })?;

        if !matches!(url.scheme(), "mqtt" | "mqtts") {
            return Err(ConfigError::InvalidConfig(format!(
                "broker_url scheme must be mqtt or mqtts, got '{}'",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::InvalidConfig(format!(
                "broker_url '{}' has no host",
                self.broker_url
            )));
        }
        if matches!(&self.client_id, Some(id) if id.trim().is_empty()) {
            return Err(ConfigError::InvalidConfig(
                "client_id must not be empty".to_string(),
            ));
        }
        if self.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_secs must be at least 1".to_string(),
            ));
        }
        if self.max_retry_interval_secs != 0 && self.min_retry_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "min_retry_interval_secs must be at least 1 when auto-reconnect is enabled"
                    .to_string(),
            ));
        }
        if self.max_retry_interval_secs != 0
            && self.min_retry_interval_secs > self.max_retry_interval_secs
        {
            return Err(ConfigError::InvalidConfig(format!(
                "min_retry_interval_secs ({}) exceeds max_retry_interval_secs ({})",
                self.min_retry_interval_secs, self.max_retry_interval_secs
            )));
        }
        Ok(())
    }
}

/// Engine tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Poll ticks to wait after a failed connect before trying again (default: 60)
    #[serde(default = "default_reconnect_delay_ticks")]
    pub reconnect_delay_ticks: u32,
    /// Queue length beyond which new QoS 0 publishes are dropped (default: 200)
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Interval at which the host is expected to call `poll_once` (default: 100)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_reconnect_delay_ticks() -> u32 {
    60
}

fn default_queue_depth() -> usize {
    200
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ticks: default_reconnect_delay_ticks(),
            queue_depth: default_queue_depth(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate engine configuration consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_depth == 0 {
            return Err(ConfigError::InvalidConfig(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Configuration for a broker URL with default engine settings
    pub fn for_broker(broker_url: impl Into<String>) -> Self {
        Self {
            mqtt: MqttSection::with_broker(broker_url),
            engine: EngineConfig::default(),
        }
    }

    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mqtt.validate()?;
        self.engine.validate()
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://127.0.0.1:1883"
client_id = "robot-7"
username_env = "MQTT_USERNAME"
password_env = "MQTT_PASSWORD"
keep_alive_secs = 30
min_retry_interval_secs = 2
max_retry_interval_secs = 30

[engine]
reconnect_delay_ticks = 10
queue_depth = 50
poll_interval_ms = 250
"#;

        let config = ClientConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.mqtt.broker_url, "mqtt://127.0.0.1:1883");
        assert_eq!(config.mqtt.client_id.as_deref(), Some("robot-7"));
        assert_eq!(config.mqtt.keep_alive(), Duration::from_secs(30));
        assert_eq!(config.mqtt.min_retry_interval_secs, 2);
        assert_eq!(config.engine.reconnect_delay_ticks, 10);
        assert_eq!(config.engine.queue_depth, 50);
        assert_eq!(config.engine.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = ClientConfig::from_toml_str(
            r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
        )
        .unwrap();

        assert_eq!(config.mqtt.client_id, None);
        assert_eq!(config.mqtt.keep_alive_secs, 20);
        assert_eq!(config.mqtt.min_retry_interval_secs, 1);
        assert_eq!(config.mqtt.max_retry_interval_secs, 60);
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.engine.reconnect_delay_ticks, 60);
        assert_eq!(config.engine.queue_depth, 200);
        assert_eq!(config.engine.poll_interval_ms, 100);
    }

    #[test]
    fn test_rejects_bad_scheme() {
        let result = ClientConfig::from_toml_str(
            r#"
[mqtt]
broker_url = "http://localhost:1883"
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_unparseable_url() {
        let mut config = ClientConfig::for_broker("not a url");
        assert!(config.validate().is_err());

        config.mqtt.broker_url = "mqtts://broker.example.com:8883".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_retry_window() {
        let mut config = ClientConfig::for_broker("mqtt://localhost:1883");
        config.mqtt.min_retry_interval_secs = 90;
        assert!(config.validate().is_err());

        // Disabling auto-reconnect makes the minimum irrelevant
        config.mqtt.max_retry_interval_secs = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_retry_minimum_with_auto_reconnect() {
        let mut config = ClientConfig::for_broker("mqtt://localhost:1883");
        config.mqtt.min_retry_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(message)) if message.contains("min_retry_interval_secs")
        ));

        config.mqtt.max_retry_interval_secs = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_queue_depth_and_empty_client_id() {
        let mut config = ClientConfig::for_broker("mqtt://localhost:1883");
        config.engine.queue_depth = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::for_broker("mqtt://localhost:1883");
        config.mqtt.client_id = Some("  ".to_string());
        assert!(config.validate().is_err());

        let mut config = ClientConfig::for_broker("mqtt://localhost:1883");
        config.mqtt.keep_alive_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_resolved_from_env() {
        let mut section = MqttSection::with_broker("mqtt://localhost:1883");
        assert_eq!(section.username(), None);

        std::env::set_var("RESILIENT_MQTT_CONFIG_TEST_USER", "operator");
        section.username_env = Some("RESILIENT_MQTT_CONFIG_TEST_USER".to_string());
        section.password_env = Some("RESILIENT_MQTT_CONFIG_TEST_MISSING".to_string());
        assert_eq!(section.username().as_deref(), Some("operator"));
        assert_eq!(section.password(), None);
        std::env::remove_var("RESILIENT_MQTT_CONFIG_TEST_USER");
    }
}
