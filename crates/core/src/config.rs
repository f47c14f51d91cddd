//! Configuration management for the wallet core.
//!
//! Configuration is read from a TOML file. Every section has defaults so a
//! partial file only needs to name what differs. Scheme identifiers are kept
//! as strings here and resolved to typed schemes by the identity crate.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

/// Default network timeout for calls to the coordinating authority.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default file name of the encrypted wallet record.
pub const DEFAULT_WALLET_FILE: &str = "wallet.enc";

/// Wallet crates at `info`, dependencies such as the HTTP stack at `warn`.
pub const DEFAULT_LOG_FILTER: &str = "warn,idwallet_core=info,idwallet_crypto=info,idwallet_identity=info";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WalletConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub schemes: SchemeConfig,
    #[serde(default)]
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_wallet_file")]
    pub wallet_file: String,
}

/// Schemes the wallet uses for its own keys and commitments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemeConfig {
    #[serde(default = "default_signing_scheme")]
    pub signing: String,
    #[serde(default = "default_attribute_hashing_scheme")]
    pub attribute_hashing: String,
}

/// The coordinating authority whose signatures on claims and challenges are verified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorityConfig {
    #[serde(default = "default_signing_scheme")]
    pub signing_scheme: String,
    /// Base64 SPKI public key
    #[serde(default)]
    pub public_key: String,
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// `RUST_LOG`, when set, takes precedence over `filter`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".idwallet")
}

fn default_wallet_file() -> String {
    DEFAULT_WALLET_FILE.to_string()
}

fn default_signing_scheme() -> String {
    "eddsaed25519".to_string()
}

fn default_attribute_hashing_scheme() -> String {
    "hmacsha256".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            wallet_file: default_wallet_file(),
        }
    }
}

impl Default for SchemeConfig {
    fn default() -> Self {
        Self {
            signing: default_signing_scheme(),
            attribute_hashing: default_attribute_hashing_scheme(),
        }
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            signing_scheme: default_signing_scheme(),
            public_key: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

impl WalletConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(CoreError::Config("api.base_url must not be empty".to_string()));
        }
        if self.api.request_timeout_ms == 0 {
            return Err(CoreError::Config(
                "api.request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.storage.wallet_file.trim().is_empty() {
            return Err(CoreError::Config(
                "storage.wallet_file must not be empty".to_string(),
            ));
        }
        for (field, value) in [
            ("schemes.signing", &self.schemes.signing),
            ("schemes.attribute_hashing", &self.schemes.attribute_hashing),
            ("authority.signing_scheme", &self.authority.signing_scheme),
            ("logging.filter", &self.logging.filter),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::Config(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }

    /// Full path of the encrypted wallet record.
    pub fn wallet_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.wallet_file)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.api.request_timeout_ms)
    }
}
