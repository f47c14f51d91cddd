//! Error types for cryptographic operations.

use thiserror::Error;

use crate::der::DerError;

/// Cryptographic operation errors.
///
/// Signature verification never produces one of these; it returns `false`.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("DER error: {0}")]
    Der(#[from] DerError),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Curve mismatch: expected {expected}, found {found}")]
    CurveMismatch { expected: String, found: String },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
