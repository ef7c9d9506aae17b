//! Custom error types for brokerbench.
//!
//! Explicit enum error types only. No `Box<dyn Error>` and no
//! `anyhow::Result` in library code; every failure is a typed variant.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type returned by drivers, producers and consumers.
#[derive(Debug, Error)]
pub enum DriverError {
    // =========================================================================
    // Configuration Errors - Fatal, Abort Initialization
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // =========================================================================
    // Connection Errors - Fatal at Initialization
    // =========================================================================
    #[error("Cannot connect to broker at {endpoints} ({role}): {source}")]
    Connection {
        endpoints: String,
        role: &'static str,
        #[source]
        source: ClientError,
    },

    // =========================================================================
    // Steady-State Errors - Surfaced Per Operation
    // =========================================================================
    #[error("Failed to create topic '{topic}': {source}")]
    Admin {
        topic: String,
        #[source]
        source: ClientError,
    },

    #[error("Failed to subscribe '{subscription}' to topic '{topic}': {source}")]
    Subscription {
        topic: String,
        subscription: String,
        #[source]
        source: ClientError,
    },

    #[error("Failed to send to topic '{topic}': {source}")]
    Send {
        topic: String,
        #[source]
        source: ClientError,
    },

    // =========================================================================
    // Teardown Errors - Logged and Swallowed by Driver Close
    // =========================================================================
    #[error("Failed to close {resource}: {source}")]
    Close {
        resource: String,
        #[source]
        source: ClientError,
    },

    #[error("Driver is closed")]
    Closed,
}

/// Configuration errors. Any of these prevents a driver from starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration parse error: {message}")]
    Parse { message: String },

    #[error("Missing required field: {field}")]
    MissingRequiredField { field: &'static str },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Failures reported by a broker client through the capability surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("No broker reachable at {endpoints}")]
    Unreachable { endpoints: String },

    #[error("Unknown topic: {topic}")]
    UnknownTopic { topic: String },

    #[error("Invalid topic name '{name}': {reason}")]
    InvalidTopicName { name: String, reason: String },

    #[error("Topic already exists: {topic}")]
    TopicAlreadyExists { topic: String },

    #[error("Connection already closed")]
    AlreadyClosed,

    #[error("Request rejected by broker: {reason}")]
    Rejected { reason: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Broker client error: {message}")]
    Backend { message: String },
}

/// Result type alias using DriverError.
pub type DriverResult<T> = Result<T, DriverError>;

/// Result type alias for broker client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidFieldValue {
            field: "replicationFactor",
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        };
        assert!(err.to_string().contains("replicationFactor"));
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_error_chain() {
        let config_err = ConfigError::MissingRequiredField { field: "endpoints" };
        let driver_err: DriverError = config_err.into();
        assert!(matches!(driver_err, DriverError::Config(_)));
    }

    #[test]
    fn test_source_is_preserved() {
        use std::error::Error as _;

        let err = DriverError::Admin {
            topic: "bench-0".to_string(),
            source: ClientError::Timeout {
                operation: "create_topic",
                timeout_ms: 500,
            },
        };
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "create_topic timed out after 500ms");
    }
}
