//! Core error types

use thiserror::Error;

/// Core error type shared by the IdWallet crates
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Timestamp could not be parsed
    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
