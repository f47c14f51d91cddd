//! Wallet identity and the Identity Challenge Protocol.
//!
//! This crate holds a self-sovereign identity wallet's state and runs its
//! exchanges with the coordinating authority.
//!
//! # Core Concepts
//!
//! - **Wallet**: attributes with per-attribute salts, scheme identifiers and
//!   the wallet's public signing key
//! - **Secure Key Store**: the signing key and anonymizing key live in a
//!   [`SecureEnclave`] and are only reachable through scoped accessors that
//!   zero the buffer on exit
//! - **Identity Challenge**: a requester asks for attributes; the wallet
//!   claims the challenge, verifies the authority's signatures, and accepts
//!   (disclosing an encrypted payload plus a commitment hash) or rejects
//!
//! # Security Model
//!
//! - Challenges and claims are trusted only after their issuer signatures verify
//! - Commitments follow the challenge's attribute order exactly
//! - Disclosed payloads are sealed under a fresh ephemeral key per accept
//! - Secrets are never logged

pub mod api;
pub mod canonical;
pub mod challenge;
pub mod client;
pub mod disclosure;
pub mod encoding;
pub mod error;
pub mod protocol;
pub mod secure_store;
pub mod wallet;

pub use api::{
    AcceptRequest, CheckAgeRequest, CheckAgeResponse, ClaimRequest, ClaimResponse,
    RegisterRequest, RegisterResponse, RejectRequest, ResetAnonymizingKeyRequest,
    ResetAnonymizingKeyResponse,
};
pub use challenge::{Challenge, ChallengeSession, ChallengeState, Claim, RequesterType};
pub use client::{HttpWalletApi, WalletApi};
pub use disclosure::{
    build_disclosure, build_rejection_hash, compute_commitment, compute_identity_hash,
    unique_requested, Disclosure, DisclosurePayload,
};
pub use error::{ApiError, ApiErrorCode, ApiOperation, IdentityError, IdentityResult};
pub use protocol::{IdentityProtocol, ProtocolSettings, WalletSession};
pub use secure_store::{InMemoryEnclave, SecretBuffer, SecureEnclave, SecureKeyStore};
pub use wallet::{
    sort_attribute_keys, Attribute, Wallet, WalletUsage, ANONYMOUS_ID_ATTRIBUTE,
    DATE_OF_BIRTH_ATTRIBUTE,
};
