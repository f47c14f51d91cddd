//! Core functionality shared by the IdWallet crates.
//!
//! This crate provides configuration, logging initialization, protocol
//! timestamps, and the shared error type.

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use config::{
    ApiConfig, AuthorityConfig, LogFormat, LoggingConfig, SchemeConfig, StorageConfig, WalletConfig,
};
pub use error::{CoreError, CoreResult};
pub use time::{format_protocol_time, is_expired, parse_protocol_time, protocol_time};
