//! Common error types for Textgen
//!
//! This module defines all error types used across the Textgen crates.
//! All errors are convertible to HTTP status codes so the server can
//! report them without inspecting messages.

use http::StatusCode;
use std::net::AddrParseError;
use thiserror::Error;

/// Main error type for Textgen
#[derive(Error, Debug)]
pub enum TextgenError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pipeline bootstrap or execution errors
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Tokenizer loading, encoding or decoding errors
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Model loading and forward pass errors
    #[error("Model error: {0}")]
    Model(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Too many pending requests (backpressure)
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AddrParseError> for TextgenError {
    fn from(err: AddrParseError) -> Self {
        TextgenError::Config(format!("Invalid bind address: {}", err))
    }
}

impl TextgenError {
    /// Convert error to the HTTP status reported to clients
    pub fn status_code(&self) -> StatusCode {
        match self {
            TextgenError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TextgenError::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            TextgenError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TextgenError::Config(_)
            | TextgenError::Pipeline(_)
            | TextgenError::Tokenizer(_)
            | TextgenError::Model(_)
            | TextgenError::Io(_)
            | TextgenError::Yaml(_)
            | TextgenError::Serialization(_)
            | TextgenError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        TextgenError::Config(msg.into())
    }

    /// Create a pipeline error
    pub fn pipeline(msg: impl Into<String>) -> Self {
        TextgenError::Pipeline(msg.into())
    }

    /// Create a tokenizer error
    pub fn tokenizer(msg: impl Into<String>) -> Self {
        TextgenError::Tokenizer(msg.into())
    }

    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        TextgenError::Model(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        TextgenError::InvalidInput(msg.into())
    }

    /// Create a queue full error
    pub fn queue_full(msg: impl Into<String>) -> Self {
        TextgenError::QueueFull(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        TextgenError::Timeout(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        TextgenError::Internal(msg.into())
    }
}

/// Result type alias for Textgen operations
pub type Result<T> = std::result::Result<T, TextgenError>;
