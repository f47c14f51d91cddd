//! Integration tests for the wallet and the Identity Challenge Protocol
//!
//! This test suite validates:
//! - Registration and wallet persistence through the Secure Key Store
//! - Claim, accept and reject against an in-process coordinating authority
//! - Disclosure decryption and identity-hash recomputation on the requester side
//! - Anonymizing-key rotation and age refresh
//! - Trust failures: tampered challenges, expired challenges, bad wallet signatures

pub mod test_utils;

#[cfg(test)]
mod challenge_flow_tests;
