//! Scheme-parameterized signatures.
//!
//! EdDSA signs the message itself. ECDSA hashes the message with the
//! scheme's digest and signs the prehash; signatures are DER-encoded.
//! Verification is a routine outcome and reports `false` instead of an error.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signer, Verifier};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::debug;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{self, Curve, KeyPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningScheme {
    EdDsaEd25519,
    EcdsaP256Sha256,
    EcdsaP256Sha384,
    EcdsaP384Sha384,
    EcdsaP384Sha512,
}

impl SigningScheme {
    pub const ALL: [SigningScheme; 5] = [
        SigningScheme::EdDsaEd25519,
        SigningScheme::EcdsaP256Sha256,
        SigningScheme::EcdsaP256Sha384,
        SigningScheme::EcdsaP384Sha384,
        SigningScheme::EcdsaP384Sha512,
    ];

    /// Identifier used on the wire and in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            SigningScheme::EdDsaEd25519 => "eddsaed25519",
            SigningScheme::EcdsaP256Sha256 => "ecdsap256_sha256",
            SigningScheme::EcdsaP256Sha384 => "ecdsap256_sha384",
            SigningScheme::EcdsaP384Sha384 => "ecdsap384_sha384",
            SigningScheme::EcdsaP384Sha512 => "ecdsap384_sha512",
        }
    }

    pub fn curve(self) -> Curve {
        match self {
            SigningScheme::EdDsaEd25519 => Curve::Ed25519,
            SigningScheme::EcdsaP256Sha256 | SigningScheme::EcdsaP256Sha384 => Curve::P256,
            SigningScheme::EcdsaP384Sha384 | SigningScheme::EcdsaP384Sha512 => Curve::P384,
        }
    }

    /// Prehash digest, `None` for EdDSA.
    pub fn hash(self) -> Option<HashAlgorithm> {
        match self {
            SigningScheme::EdDsaEd25519 => None,
            SigningScheme::EcdsaP256Sha256 => Some(HashAlgorithm::Sha256),
            SigningScheme::EcdsaP256Sha384 | SigningScheme::EcdsaP384Sha384 => {
                Some(HashAlgorithm::Sha384)
            }
            SigningScheme::EcdsaP384Sha512 => Some(HashAlgorithm::Sha512),
        }
    }

    pub fn generate_key_pair(self) -> CryptoResult<KeyPair> {
        KeyPair::generate(self.curve())
    }
}

impl fmt::Display for SigningScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningScheme {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        SigningScheme::ALL
            .into_iter()
            .find(|scheme| scheme.as_str() == normalized)
            .ok_or_else(|| CryptoError::UnsupportedScheme(s.to_string()))
    }
}

/// Sign `data` with a PKCS#8 private key.
pub fn sign(scheme: SigningScheme, private_der: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
    let private_key = keys::parse_pkcs8(private_der, scheme.curve())?;

    match scheme {
        SigningScheme::EdDsaEd25519 => {
            let key = keys::ed25519_signing_key(&private_key)?;
            Ok(key.sign(data).to_bytes().to_vec())
        }
        SigningScheme::EcdsaP256Sha256 | SigningScheme::EcdsaP256Sha384 => {
            let digest = prehash(scheme, data);
            let key = p256::ecdsa::SigningKey::from_slice(&private_key)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let signature: p256::ecdsa::Signature = key
                .sign_prehash(&digest)
                .map_err(|e| CryptoError::Signing(e.to_string()))?;
            Ok(signature.to_der().as_bytes().to_vec())
        }
        SigningScheme::EcdsaP384Sha384 | SigningScheme::EcdsaP384Sha512 => {
            let digest = prehash(scheme, data);
            let key = p384::ecdsa::SigningKey::from_slice(&private_key)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let signature: p384::ecdsa::Signature = key
                .sign_prehash(&digest)
                .map_err(|e| CryptoError::Signing(e.to_string()))?;
            Ok(signature.to_der().as_bytes().to_vec())
        }
    }
}

/// Verify `signature` over `data` with an SPKI public key.
///
/// Malformed keys, malformed signatures and mismatched curves all yield `false`.
pub fn verify(scheme: SigningScheme, public_der: &[u8], data: &[u8], signature: &[u8]) -> bool {
    match try_verify(scheme, public_der, data, signature) {
        Ok(()) => true,
        Err(reason) => {
            debug!(scheme = %scheme, reason = %reason, "Signature rejected");
            false
        }
    }
}

fn try_verify(
    scheme: SigningScheme,
    public_der: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<(), String> {
    let public_key = keys::parse_spki(public_der, scheme.curve()).map_err(|e| e.to_string())?;

    match scheme {
        SigningScheme::EdDsaEd25519 => {
            let bytes: [u8; 32] = public_key
                .as_slice()
                .try_into()
                .map_err(|_| "Ed25519 key must be 32 bytes".to_string())?;
            let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|e| e.to_string())?;
            let signature =
                ed25519_dalek::Signature::from_slice(signature).map_err(|e| e.to_string())?;
            key.verify(data, &signature).map_err(|e| e.to_string())
        }
        SigningScheme::EcdsaP256Sha256 | SigningScheme::EcdsaP256Sha384 => {
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&public_key)
                .map_err(|e| e.to_string())?;
            let signature =
                p256::ecdsa::Signature::from_der(signature).map_err(|e| e.to_string())?;
            key.verify_prehash(&prehash(scheme, data), &signature)
                .map_err(|e| e.to_string())
        }
        SigningScheme::EcdsaP384Sha384 | SigningScheme::EcdsaP384Sha512 => {
            let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(&public_key)
                .map_err(|e| e.to_string())?;
            let signature =
                p384::ecdsa::Signature::from_der(signature).map_err(|e| e.to_string())?;
            key.verify_prehash(&prehash(scheme, data), &signature)
                .map_err(|e| e.to_string())
        }
    }
}

fn prehash(scheme: SigningScheme, data: &[u8]) -> Vec<u8> {
    match scheme.hash() {
        Some(hash) => hash.digest(data),
        None => data.to_vec(),
    }
}
