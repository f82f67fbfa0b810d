//! Error types for Codebox.

use thiserror::Error;

/// Result type alias using Codebox's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Codebox.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Contract Errors
    // =========================================================================
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // =========================================================================
    // Security Errors
    // =========================================================================
    #[error("Security validation denied: {0}")]
    ValidationDenied(String),

    // =========================================================================
    // Isolation Runtime Errors
    // =========================================================================
    #[error("Isolation infrastructure error: {0}")]
    Infrastructure(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    // =========================================================================
    // Execution Errors
    // =========================================================================
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("Executor error: {0}")]
    Executor(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a validation denial.
    pub fn validation_denied(msg: impl Into<String>) -> Self {
        Self::ValidationDenied(msg.into())
    }

    /// Create an infrastructure error.
    pub fn infrastructure(msg: impl Into<String>) -> Self {
        Self::Infrastructure(msg.into())
    }

    /// Create an executor error.
    pub fn executor(msg: impl Into<String>) -> Self {
        Self::Executor(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable category name reported to callers as `error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::UnsupportedLanguage(_) | Self::InvalidRequest(_) => "InvalidRequest",
            Self::ValidationDenied(_) => "SecurityViolation",
            Self::Infrastructure(_) | Self::ImageNotFound(_) => "InfrastructureError",
            Self::Timeout(_) => "TimeoutExceeded",
            Self::ResourceLimit(_) => "ResourceLimitBreach",
            _ => "ExecutorError",
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
