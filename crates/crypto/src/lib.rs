//! Cryptographic primitives for the IdWallet identity wallet.
//!
//! # Core Capabilities
//!
//! - **DER Codec**: the ASN.1 subset needed for PKCS#8 and SPKI
//! - **Key Material**: generation and DER encoding for X25519, Ed25519, P-256, P-384
//! - **Signing**: EdDSA and ECDSA-over-hash, selected by scheme identifier
//! - **Encrypting**: ECDH, HKDF and AES-256-GCM, selected by scheme identifier
//! - **Keyed Hashing**: HMAC commitments for attribute disclosure
//!
//! # Security Principles
//!
//! - Secrets are held in zeroizing buffers and never logged
//! - Signature verification reports `false` instead of failing
//! - Every encryption uses a fresh nonce and, when sealing, a fresh ephemeral key

pub mod der;
pub mod encrypting;
pub mod error;
pub mod hashing;
pub mod keys;
pub mod random;
pub mod signing;

pub use der::{DerError, DerReader, DerResult};
pub use encrypting::{EncryptingScheme, SealedPayload, SymmetricKey};
pub use error::{CryptoError, CryptoResult};
pub use hashing::HashingScheme;
pub use keys::{fingerprint, generate_raw_key_pair, Curve, KeyPair, RawKeyPair};
pub use random::{random_array, random_bytes, random_secret};
pub use signing::{HashAlgorithm, SigningScheme};
