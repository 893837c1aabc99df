//! Error types for the resilient MQTT client
//!
//! Connection problems, publish rejections, capacity drops and lookup misses
//! are handled inside the engine and never surface here. Only construction
//! paths (configuration, transport setup, QoS parsing) return errors.

use crate::config::ConfigError;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for client construction and setup
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid QoS level {0}, expected 0, 1 or 2")]
    InvalidQos(u8),
}

/// Result type for client setup operations
pub type ClientResult<T> = Result<T, ClientError>;
