//! Error types for queue operations.

use std::time::Duration;
use thiserror::Error;

/// Error code the service returns when a long poll finds nothing to deliver.
pub const NO_MESSAGE_MARKER: &str = "MessageNotExist";

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("MessageNotExist: no message available")]
    NoMessage,

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Receipt handle rejected: {receipt}: {message}")]
    InvalidReceipt { receipt: String, message: String },

    #[error("No handler registered for tag {tag:?} (message {message_id})")]
    UnroutableMessage {
        tag: Option<String>,
        message_id: String,
    },

    #[error("Background task failed: {message}")]
    TaskFailed { message: String },

    #[error("Provider error: {code} - {message}")]
    ProviderError {
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl QueueError {
    /// Check if the error is the benign "queue currently empty" signal
    ///
    /// Provider errors are matched on the service marker as well, so a transport
    /// that does not map the code to [`QueueError::NoMessage`] is still recognised.
    pub fn is_no_message(&self) -> bool {
        match self {
            Self::NoMessage => true,
            Self::ProviderError { code, message, .. } => {
                code.contains(NO_MESSAGE_MARKER) || message.contains(NO_MESSAGE_MARKER)
            }
            _ => false,
        }
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NoMessage => true,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::InvalidReceipt { .. } => false,
            Self::UnroutableMessage { .. } => false,
            Self::TaskFailed { .. } => true,
            Self::ProviderError { .. } => true, // Service-side errors are usually transient
            Self::Serialization(_) => false,
            Self::Configuration(_) => false,
            Self::Validation(_) => false,
        }
    }
}

/// Errors while encoding or decoding wire payloads
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("XML parsing failed: {message}")]
    Xml { message: String },

    #[error("Response is missing element <{element}>")]
    MissingElement { element: String },

    #[error("Element <{element}> has invalid value {value:?}")]
    InvalidValue { element: String, value: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("handler is not defined")]
    NoHandlers,

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
