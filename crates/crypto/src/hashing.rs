//! Keyed hashing for attribute commitments.

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

use crate::error::{CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashingScheme {
    HmacSha256,
    HmacSha512,
}

impl HashingScheme {
    pub const ALL: [HashingScheme; 2] = [HashingScheme::HmacSha256, HashingScheme::HmacSha512];

    pub fn as_str(self) -> &'static str {
        match self {
            HashingScheme::HmacSha256 => "hmacsha256",
            HashingScheme::HmacSha512 => "hmacsha512",
        }
    }

    pub fn output_len(self) -> usize {
        match self {
            HashingScheme::HmacSha256 => 32,
            HashingScheme::HmacSha512 => 64,
        }
    }
}

impl fmt::Display for HashingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashingScheme {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        HashingScheme::ALL
            .into_iter()
            .find(|scheme| scheme.as_str() == normalized)
            .ok_or_else(|| CryptoError::UnsupportedScheme(s.to_string()))
    }
}

/// HMAC of `input` under `key`.
pub fn hash(scheme: HashingScheme, key: &[u8], input: &[u8]) -> CryptoResult<Vec<u8>> {
    let output = match scheme {
        HashingScheme::HmacSha256 => {
            let mut mac = HmacSha256::new_from_slice(key)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            mac.update(input);
            mac.finalize().into_bytes().to_vec()
        }
        HashingScheme::HmacSha512 => {
            let mut mac = HmacSha512::new_from_slice(key)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            mac.update(input);
            mac.finalize().into_bytes().to_vec()
        }
    };
    Ok(output)
}

/// Whether `hash` has the digest length `scheme` produces.
pub fn validate(scheme: HashingScheme, hash: &[u8]) -> bool {
    hash.len() == scheme.output_len()
}
