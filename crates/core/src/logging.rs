//! Structured logging for the wallet core.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the `[logging]`
//! config section. Secrets, attribute values and salts are never logged;
//! wallets appear in logs by id and public-key fingerprint only.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{CoreError, CoreResult};

/// Resolve the effective filter for `config`.
pub fn env_filter(config: &LoggingConfig) -> CoreResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter)
        .map_err(|e| CoreError::Config(format!("invalid logging.filter '{}': {e}", config.filter)))
}

/// Install the global subscriber described by `config`.
///
/// # Example
/// ```no_run
/// use idwallet_core::{logging, WalletConfig};
///
/// let config = WalletConfig::default();
/// logging::init(&config.logging).expect("logging");
/// tracing::info!(wallet_id = "wal_123", "Wallet loaded");
/// ```
pub fn init(config: &LoggingConfig) -> CoreResult<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    };
    installed.map_err(|e| CoreError::Config(format!("logging already initialized: {e}")))
}
