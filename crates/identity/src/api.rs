//! Request and response bodies for the coordinating authority.
//!
//! Field names are part of the wire contract. Binary values are standard
//! base64 strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::challenge::{Challenge, Claim};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub signing_scheme: String,
    pub signing_public_key: String,
    pub time: String,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub wallet_id: String,
    pub anonymizing_key: String,
    pub anonymizing_hashing_scheme: String,
    pub identity_attribute_hashing_scheme: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetAnonymizingKeyRequest {
    pub time: String,
    pub nonce: String,
    pub wallet_id: String,
    pub wallet_signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetAnonymizingKeyResponse {
    pub wallet_id: String,
    pub anonymizing_key: String,
    pub anonymizing_hashing_scheme: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckAgeRequest {
    pub time: String,
    pub nonce: String,
    pub wallet_id: String,
    pub date_of_birth: String,
    pub date_of_birth_salt: String,
    pub wallet_signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckAgeResponse {
    pub wallet_id: String,
    pub age: u32,
    /// Derived attributes such as `age_over_18`
    pub identity_attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub time: String,
    pub nonce: String,
    pub challenge_id: String,
    pub wallet_id: String,
    pub wallet_signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub claim: Claim,
    pub challenge: Challenge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptRequest {
    pub time: String,
    pub nonce: String,
    pub challenge_id: String,
    pub wallet_id: String,
    pub identity_hash: String,
    /// Serialized as a JSON object with alphabetically ordered keys
    pub identity_attribute_hashing_salts: BTreeMap<String, String>,
    /// SPKI of the ephemeral sender key
    pub identity_encrypting_wallet_key: String,
    pub identity_encrypting_nonce: String,
    pub identity_encrypted: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymizing_key: Option<String>,
    pub wallet_signature: String,
}

impl AcceptRequest {
    /// Zeroize and clear the anonymizing key once the request has been sent.
    pub fn wipe_anonymizing_key(&mut self) {
        self.anonymizing_key.zeroize();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectRequest {
    pub time: String,
    pub nonce: String,
    pub challenge_id: String,
    pub wallet_id: String,
    pub identity_hash: String,
    pub wallet_signature: String,
}
