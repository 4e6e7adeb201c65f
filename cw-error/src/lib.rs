//! Unified error handling for Crownwatch
//!
//! One error type shared by the worker, the protocol crate and the host service.
//! Errors never cross the worker boundary as values; they are rendered into
//! protocol responses first.

use std::io;
use std::path::PathBuf;

/// Result type alias using CrownwatchError
pub type Result<T> = std::result::Result<T, CrownwatchError>;

/// Unified error type for all Crownwatch operations
#[derive(thiserror::Error, Debug)]
pub enum CrownwatchError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ============================================================================
    // Device SDK Errors
    // ============================================================================
    #[error("Device SDK error: {0}")]
    Sdk(String),

    #[error("Device SDK unavailable: {0}")]
    SdkUnavailable(String),

    #[error("Device not connected")]
    NotConnected,

    #[error("Subscription to {channel} failed: {reason}")]
    Subscription {
        channel: String,
        reason: String,
    },

    #[error("Invalid metric data: {0}")]
    InvalidData(String),

    // ============================================================================
    // Worker and IPC Errors
    // ============================================================================
    #[error("Worker not available")]
    WorkerUnavailable,

    #[error("Worker connection failed: {0}")]
    WorkerConnection(String),

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl CrownwatchError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an SDK error from a string
    pub fn sdk(msg: impl Into<String>) -> Self {
        Self::Sdk(msg.into())
    }

    /// Create a subscription error for a named channel
    pub fn subscription(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Subscription {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a worker error from a string
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::WorkerConnection(msg.into())
    }
}

impl From<String> for CrownwatchError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

impl From<&str> for CrownwatchError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_display() {
        let err = CrownwatchError::subscription("calm", "handle rejected");
        assert_eq!(err.to_string(), "Subscription to calm failed: handle rejected");
    }

    #[test]
    fn test_from_str_is_generic() {
        let err: CrownwatchError = "boom".into();
        assert!(matches!(err, CrownwatchError::Generic(ref m) if m == "boom"));
    }
}
