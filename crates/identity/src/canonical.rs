//! Canonical signing strings.
//!
//! Each string is a sequence of fields, each followed by `|` (so the string
//! ends with a trailing pipe). The authority rebuilds the same text from the
//! request body, so field order and encoding here are part of the wire
//! contract.

use idwallet_crypto::random_bytes;

use crate::api::{AcceptRequest, CheckAgeRequest, RejectRequest};
use crate::challenge::{Challenge, Claim};
use crate::encoding;

/// Characters in a request nonce.
pub const NONCE_LENGTH: usize = 32;

/// 32 URL-safe base64 characters drawn from 32 random bytes.
pub fn protocol_nonce() -> String {
    let mut nonce = encoding::encode_url_safe(&random_bytes(32));
    nonce.truncate(NONCE_LENGTH);
    nonce
}

fn pipe_join(fields: &[&str]) -> String {
    let capacity = fields.iter().map(|f| f.len() + 1).sum();
    let mut out = String::with_capacity(capacity);
    for field in fields {
        out.push_str(field);
        out.push('|');
    }
    out
}

/// `key:salt` pairs joined by commas, in alphabetical key order.
///
/// Independent of the challenge order used for commitments.
pub fn salts_string<K, V, I>(salts: I) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
    I: IntoIterator<Item = (K, V)>,
{
    let mut pairs: Vec<(K, V)> = salts.into_iter().collect();
    pairs.sort_by(|a, b| a.0.as_ref().cmp(b.0.as_ref()));
    pairs
        .iter()
        .map(|(key, salt)| format!("{}:{}", key.as_ref(), salt.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// `time|nonce|challenge_id|wallet_id|`
pub fn claim_string(time: &str, nonce: &str, challenge_id: &str, wallet_id: &str) -> String {
    pipe_join(&[time, nonce, challenge_id, wallet_id])
}

/// `time|nonce|challenge_id|wallet_id|identity_hash|salts|ephemeral_key|nonce|ciphertext|anonymizing_key|`
pub fn accept_string(request: &AcceptRequest) -> String {
    let salts = salts_string(&request.identity_attribute_hashing_salts);
    pipe_join(&[
        &request.time,
        &request.nonce,
        &request.challenge_id,
        &request.wallet_id,
        &request.identity_hash,
        &salts,
        &request.identity_encrypting_wallet_key,
        &request.identity_encrypting_nonce,
        &request.identity_encrypted,
        request.anonymizing_key.as_deref().unwrap_or(""),
    ])
}

/// `time|nonce|challenge_id|wallet_id|identity_hash|`
pub fn reject_string(request: &RejectRequest) -> String {
    pipe_join(&[
        &request.time,
        &request.nonce,
        &request.challenge_id,
        &request.wallet_id,
        &request.identity_hash,
    ])
}

/// `time|nonce|wallet_id|`
pub fn reset_anonymizing_key_string(time: &str, nonce: &str, wallet_id: &str) -> String {
    pipe_join(&[time, nonce, wallet_id])
}

/// `time|nonce|wallet_id|date_of_birth|date_of_birth_salt|`
pub fn check_age_string(request: &CheckAgeRequest) -> String {
    pipe_join(&[
        &request.time,
        &request.nonce,
        &request.wallet_id,
        &request.date_of_birth,
        &request.date_of_birth_salt,
    ])
}

/// Issuer-signed text of a challenge: `id|attr1,attr2,...|encrypting_scheme|expires_at|`.
/// Attributes stay in the order the authority sent them.
pub fn challenge_issuer_string(challenge: &Challenge) -> String {
    let attributes = challenge.identity_attributes.join(",");
    pipe_join(&[
        &challenge.id,
        &attributes,
        &challenge.identity_encrypting_scheme,
        &challenge.expires_at,
    ])
}

/// Issuer-signed text of a claim:
/// `challenge_id|time|requester_id|requester_name|requester_type|requester_public_key|`.
pub fn claim_issuer_string(challenge_id: &str, claim: &Claim) -> String {
    pipe_join(&[
        challenge_id,
        &claim.time,
        &claim.requester_id,
        &claim.requester_name,
        claim.requester_type.as_str(),
        &claim.requester_public_key,
    ])
}
