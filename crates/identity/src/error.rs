//! Error types for wallet and identity-challenge operations.

use std::fmt;

use idwallet_core::CoreError;
use idwallet_crypto::CryptoError;
use thiserror::Error;

/// Remote operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOperation {
    Register,
    ResetAnonymizingKey,
    CheckAge,
    Claim,
    Accept,
    Reject,
}

impl ApiOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiOperation::Register => "register",
            ApiOperation::ResetAnonymizingKey => "reset-anonymizing-key",
            ApiOperation::CheckAge => "check-age",
            ApiOperation::Claim => "claim",
            ApiOperation::Accept => "accept",
            ApiOperation::Reject => "reject",
        }
    }

    /// Endpoint path relative to the authority base URL.
    pub fn path(self) -> &'static str {
        match self {
            ApiOperation::Register => "/wallets/register",
            ApiOperation::ResetAnonymizingKey => "/wallets/reset-anonymizing-key",
            ApiOperation::CheckAge => "/wallets/check-age",
            ApiOperation::Claim => "/identity-challenges/claim",
            ApiOperation::Accept => "/identity-challenges/accept",
            ApiOperation::Reject => "/identity-challenges/reject",
        }
    }
}

impl fmt::Display for ApiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable failure code for remote operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorCode {
    RequestFailed,
    InvalidSignature,
    NetworkError,
    Unauthorized,
    Timeout,
    InvalidResponse,
}

impl ApiErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiErrorCode::RequestFailed => "REQUEST_FAILED",
            ApiErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            ApiErrorCode::NetworkError => "NETWORK_ERROR",
            ApiErrorCode::Unauthorized => "UNAUTHORIZED",
            ApiErrorCode::Timeout => "TIMEOUT",
            ApiErrorCode::InvalidResponse => "INVALID_RESPONSE",
        }
    }
}

impl fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call to the coordinating authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub operation: ApiOperation,
    pub code: ApiErrorCode,
    /// HTTP status, when a response was received
    pub status: Option<u16>,
    /// Raw response body or transport error text
    pub body: Option<String>,
}

impl ApiError {
    pub fn new(operation: ApiOperation, code: ApiErrorCode) -> Self {
        Self {
            operation,
            code,
            status: None,
            body: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.code)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP {status})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Errors that can occur in wallet and protocol operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required secure-enclave entry is absent
    #[error("Secret not found in secure enclave: {0}")]
    MissingSecret(String),

    #[error("Wallet not found")]
    WalletNotFound,

    #[error("Wallet already exists")]
    WalletExists,

    /// Stored wallet failed integrity checks; it has been deleted when the id disagreed
    #[error("Wallet corrupted: {0}")]
    WalletCorrupted(String),

    #[error("Attribute not held by wallet: {0}")]
    MissingAttribute(String),

    /// Issuer signature on a claimed challenge did not verify
    #[error("Untrusted challenge {challenge_id}: {reason}")]
    UntrustedChallenge { challenge_id: String, reason: String },

    #[error("Challenge {challenge_id} expired at {expires_at}")]
    ChallengeExpired {
        challenge_id: String,
        expires_at: String,
    },

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
