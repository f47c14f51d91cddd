//! ECDH key agreement, HKDF key derivation and AES-256-GCM.
//!
//! The symmetric key is `HKDF(shared_secret, salt = empty, info = scheme id)`,
//! 32 bytes. For P-256 and P-384 the shared secret is the x-coordinate of the
//! shared point. Every encryption draws a fresh 12-byte nonce and returns it
//! alongside `ciphertext || tag`.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use sha2::{Sha256, Sha384};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{self, Curve, KeyPair};
use crate::random::random_array;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

/// Derived AES-256 key, zeroed on drop.
pub type SymmetricKey = Zeroizing<[u8; KEY_SIZE]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptingScheme {
    EcdhX25519HkdfSha256Aes256Gcm,
    EcdhP256HkdfSha256Aes256Gcm,
    EcdhP384HkdfSha384Aes256Gcm,
}

impl EncryptingScheme {
    pub const ALL: [EncryptingScheme; 3] = [
        EncryptingScheme::EcdhX25519HkdfSha256Aes256Gcm,
        EncryptingScheme::EcdhP256HkdfSha256Aes256Gcm,
        EncryptingScheme::EcdhP384HkdfSha384Aes256Gcm,
    ];

    /// Identifier used on the wire. Also the HKDF `info` input.
    pub fn as_str(self) -> &'static str {
        match self {
            EncryptingScheme::EcdhX25519HkdfSha256Aes256Gcm => "ecdhx25519_hkdfsha256_aes256gcm",
            EncryptingScheme::EcdhP256HkdfSha256Aes256Gcm => "ecdhp256_hkdfsha256_aes256gcm",
            EncryptingScheme::EcdhP384HkdfSha384Aes256Gcm => "ecdhp384_hkdfsha384_aes256gcm",
        }
    }

    pub fn curve(self) -> Curve {
        match self {
            EncryptingScheme::EcdhX25519HkdfSha256Aes256Gcm => Curve::X25519,
            EncryptingScheme::EcdhP256HkdfSha256Aes256Gcm => Curve::P256,
            EncryptingScheme::EcdhP384HkdfSha384Aes256Gcm => Curve::P384,
        }
    }

    pub fn generate_key_pair(self) -> CryptoResult<KeyPair> {
        KeyPair::generate(self.curve())
    }
}

impl fmt::Display for EncryptingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptingScheme {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        EncryptingScheme::ALL
            .into_iter()
            .find(|scheme| scheme.as_str() == normalized)
            .ok_or_else(|| CryptoError::UnsupportedScheme(s.to_string()))
    }
}

/// Derive the shared AES key between a PKCS#8 private key and a peer's SPKI
/// public key. Symmetric in the two parties.
pub fn derive_key(
    scheme: EncryptingScheme,
    private_der: &[u8],
    peer_public_der: &[u8],
) -> CryptoResult<SymmetricKey> {
    let curve = scheme.curve();
    let private_key = keys::parse_pkcs8(private_der, curve)?;
    let peer_public = keys::parse_spki(peer_public_der, curve)?;

    let shared = shared_secret(curve, &private_key, &peer_public)?;
    expand(scheme, &shared)
}

fn shared_secret(
    curve: Curve,
    private_key: &[u8],
    peer_public: &[u8],
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    match curve {
        Curve::X25519 => {
            let secret = keys::x25519_secret(private_key)?;
            let bytes: [u8; 32] = peer_public
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("X25519 key must be 32 bytes".to_string()))?;
            let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(bytes));
            if !shared.was_contributory() {
                return Err(CryptoError::InvalidKey(
                    "X25519 peer key has low order".to_string(),
                ));
            }
            Ok(Zeroizing::new(shared.as_bytes().to_vec()))
        }
        Curve::P256 => {
            let secret = p256::SecretKey::from_slice(private_key)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let public = p256::PublicKey::from_sec1_bytes(peer_public)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
            Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
        }
        Curve::P384 => {
            let secret = p384::SecretKey::from_slice(private_key)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let public = p384::PublicKey::from_sec1_bytes(peer_public)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let shared = p384::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
            Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
        }
        Curve::Ed25519 => Err(CryptoError::UnsupportedScheme(
            "ed25519 keys cannot be used for key agreement".to_string(),
        )),
    }
}

fn expand(scheme: EncryptingScheme, shared: &[u8]) -> CryptoResult<SymmetricKey> {
    let info = scheme.as_str().as_bytes();
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    let result = match scheme {
        EncryptingScheme::EcdhX25519HkdfSha256Aes256Gcm
        | EncryptingScheme::EcdhP256HkdfSha256Aes256Gcm => {
            Hkdf::<Sha256>::new(None, shared).expand(info, &mut okm[..])
        }
        EncryptingScheme::EcdhP384HkdfSha384Aes256Gcm => {
            Hkdf::<Sha384>::new(None, shared).expand(info, &mut okm[..])
        }
    };
    result.map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// AES-256-GCM under a fresh random nonce. Returns `(nonce, ciphertext || tag)`.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> CryptoResult<([u8; NONCE_SIZE], Vec<u8>)> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let nonce = random_array::<NONCE_SIZE>();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    Ok((nonce, ciphertext))
}

/// Authenticated decryption. Any tampering with key, nonce or ciphertext is an error.
pub fn decrypt(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::Decryption(format!(
            "nonce must be {NONCE_SIZE} bytes, got {}",
            nonce.len()
        )));
    }
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::Decryption(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decryption("authentication failed".to_string()))
}

/// Payload encrypted to a recipient under a one-time sender key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// SPKI of the ephemeral sender key
    pub ephemeral_public_key: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

/// Encrypt `plaintext` to `recipient_public_der` with a fresh ephemeral key pair.
/// The ephemeral private key is dropped before returning.
pub fn seal(
    scheme: EncryptingScheme,
    recipient_public_der: &[u8],
    plaintext: &[u8],
) -> CryptoResult<SealedPayload> {
    let ephemeral = scheme.generate_key_pair()?;
    let key = derive_key(scheme, ephemeral.private_der(), recipient_public_der)?;
    let (nonce, ciphertext) = encrypt(&key[..], plaintext)?;

    Ok(SealedPayload {
        ephemeral_public_key: ephemeral.public_der().to_vec(),
        nonce,
        ciphertext,
    })
}

/// Recipient side of [`seal`].
pub fn open(
    scheme: EncryptingScheme,
    recipient_private_der: &[u8],
    sealed: &SealedPayload,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let key = derive_key(scheme, recipient_private_der, &sealed.ephemeral_public_key)?;
    decrypt(&key[..], &sealed.nonce, &sealed.ciphertext)
}
