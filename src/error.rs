//! Error types for the sidecar

use thiserror::Error;

/// Errors that can occur in the sidecar
#[derive(Debug, Error)]
pub enum SidecarError {
    /// Configuration load or validation failure
    #[error("Configuration error: {0}")]
    Config(String),

    /// NATS connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Expression rejected by the matching tree
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    /// Broker subscribe failure
    #[error("Failed to subscribe to subject '{subject}': {reason}")]
    Subscribe {
        subject: String,
        reason: String,
    },

    /// Broker publish failure
    #[error("Failed to publish to subject '{subject}': {reason}")]
    Publish {
        subject: String,
        reason: String,
    },

    /// JetStream key-value bucket or watch failure
    #[error("Key-value error: {0}")]
    KeyValue(String),

    /// Control-plane JSON failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure (config file, TLS material)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sidecar operations
pub type Result<T> = std::result::Result<T, SidecarError>;
