//! Attribute commitments and the aggregate identity hash.
//!
//! For each requested attribute with a value:
//! `commitment = HMAC(attribute_scheme, utf8(salt), utf8(value))`.
//! The identity hash binds the commitments, concatenated in challenge order,
//! to the challenge: `HMAC(attribute_scheme, utf8(challenge_id), c1 || c2 || ...)`.

use std::collections::{BTreeMap, BTreeSet};

use idwallet_crypto::hashing::{self, HashingScheme};
use serde::Serialize;

use crate::error::IdentityResult;
use crate::wallet::{generate_salt, Attribute, Wallet, ANONYMOUS_ID_ATTRIBUTE};

pub fn compute_commitment(scheme: HashingScheme, salt: &str, value: &str) -> IdentityResult<Vec<u8>> {
    Ok(hashing::hash(scheme, salt.as_bytes(), value.as_bytes())?)
}

pub fn compute_identity_hash(
    scheme: HashingScheme,
    challenge_id: &str,
    commitments: &[Vec<u8>],
) -> IdentityResult<Vec<u8>> {
    Ok(hashing::hash(scheme, challenge_id.as_bytes(), &commitments.concat())?)
}

/// JSON body encrypted to the requester: `{"attributes": {name: {value, salt} | null}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisclosurePayload {
    pub attributes: BTreeMap<String, Option<Attribute>>,
}

/// Everything an accept or reject needs from the wallet's attributes.
#[derive(Debug, Clone)]
pub struct Disclosure {
    pub payload: DisclosurePayload,
    /// Commitments for disclosed attributes, in challenge order
    pub commitments: Vec<Vec<u8>>,
    pub identity_hash: Vec<u8>,
    /// Salts of disclosed attributes
    pub salts: BTreeMap<String, String>,
}

impl Disclosure {
    pub fn disclosed_count(&self) -> usize {
        self.commitments.len()
    }

    pub fn withheld(&self) -> Vec<&str> {
        self.payload
            .attributes
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Requested names in challenge order with repeats dropped; the first occurrence wins.
pub fn unique_requested(requested: &[String]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    requested
        .iter()
        .map(String::as_str)
        .filter(|name| seen.insert(*name))
        .collect()
}

/// Resolve `requested` against the wallet in the order given.
///
/// `anonymous_id` is the already-derived pseudonym for this requester; when
/// it is `None` the pseudo-attribute is treated as unavailable. Attributes the
/// wallet does not hold become `null` in the payload and do not contribute a
/// commitment. A name listed more than once is committed once.
pub fn build_disclosure(
    wallet: &Wallet,
    challenge_id: &str,
    requested: &[String],
    anonymous_id: Option<&str>,
) -> IdentityResult<Disclosure> {
    let scheme = wallet.attribute_hashing_scheme;
    let mut payload = BTreeMap::new();
    let mut commitments = Vec::with_capacity(requested.len());
    let mut salts = BTreeMap::new();

    for name in unique_requested(requested) {
        let resolved = if name == ANONYMOUS_ID_ATTRIBUTE {
            anonymous_id.map(|value| Attribute {
                value: value.to_string(),
                salt: generate_salt(),
            })
        } else {
            wallet.attribute(name).cloned()
        };

        if let Some(attribute) = &resolved {
            commitments.push(compute_commitment(scheme, &attribute.salt, &attribute.value)?);
            salts.insert(name.to_string(), attribute.salt.clone());
        }
        payload.insert(name.to_string(), resolved);
    }

    let identity_hash = compute_identity_hash(scheme, challenge_id, &commitments)?;
    Ok(Disclosure {
        payload: DisclosurePayload {
            attributes: payload,
        },
        commitments,
        identity_hash,
        salts,
    })
}

/// Identity hash for a rejection.
///
/// Covers only the requested attributes the wallet holds, with their stored
/// salts, so the requester can recompute it once those salts are shared.
/// `anonymous_id` is derived per requester rather than held and never
/// contributes.
pub fn build_rejection_hash(
    wallet: &Wallet,
    challenge_id: &str,
    requested: &[String],
) -> IdentityResult<Vec<u8>> {
    let scheme = wallet.attribute_hashing_scheme;
    let commitments = unique_requested(requested)
        .into_iter()
        .filter(|name| *name != ANONYMOUS_ID_ATTRIBUTE)
        .filter_map(|name| wallet.attribute(name))
        .map(|attribute| compute_commitment(scheme, &attribute.salt, &attribute.value))
        .collect::<IdentityResult<Vec<_>>>()?;
    compute_identity_hash(scheme, challenge_id, &commitments)
}
