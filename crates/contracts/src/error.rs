//! Layered error definitions
//!
//! Categorized by source: config / frame / consumer

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Frame Errors =====
    /// Image bytes do not match the declared shape/dtype
    #[error("invalid frame: {message}")]
    InvalidFrame { message: String },

    // ===== Consumer Errors =====
    /// A consumer callback failed
    #[error("consumer '{consumer}' error: {message}")]
    Consumer { consumer: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create invalid frame error
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: message.into(),
        }
    }

    /// Create consumer callback error
    pub fn consumer(consumer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consumer {
            consumer: consumer.into(),
            message: message.into(),
        }
    }
}
