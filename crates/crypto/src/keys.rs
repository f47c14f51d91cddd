//! Key material for X25519, Ed25519, P-256 and P-384.
//!
//! Keys leave this module DER-encoded: private keys as PKCS#8 (RFC 5208,
//! with RFC 8410 bodies for the Edwards/Montgomery curves and RFC 5915
//! ECPrivateKey bodies for the NIST curves) and public keys as SPKI.
//! NIST public keys are uncompressed SEC1 points.

use std::fmt;

use p256::elliptic_curve::sec1::ToEncodedPoint;
use tracing::warn;
use zeroize::Zeroizing;

use crate::der::{self, compat, DerError, DerReader};
use crate::error::{CryptoError, CryptoResult};
use crate::random::random_secret;

pub const OID_X25519: &[u64] = &[1, 3, 101, 110];
pub const OID_ED25519: &[u64] = &[1, 3, 101, 112];
pub const OID_EC_PUBLIC_KEY: &[u64] = &[1, 2, 840, 10045, 2, 1];
pub const OID_P256: &[u64] = &[1, 2, 840, 10045, 3, 1, 7];
pub const OID_P384: &[u64] = &[1, 3, 132, 0, 34];

/// Header of an RFC 8410 `CurvePrivateKey` inside its PKCS#8 OCTET STRING.
const CURVE_PRIVATE_KEY_MARKER: [u8; 4] = [0x04, 0x22, 0x04, 0x20];

const PKCS8_VERSION: u8 = 0;
const PKCS8_VERSION_WITH_PUBLIC: u8 = 1;
const EC_PRIVATE_KEY_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    X25519,
    Ed25519,
    P256,
    P384,
}

impl Curve {
    pub fn as_str(self) -> &'static str {
        match self {
            Curve::X25519 => "x25519",
            Curve::Ed25519 => "ed25519",
            Curve::P256 => "p256",
            Curve::P384 => "p384",
        }
    }

    pub fn private_key_len(self) -> usize {
        match self {
            Curve::X25519 | Curve::Ed25519 | Curve::P256 => 32,
            Curve::P384 => 48,
        }
    }

    pub fn public_key_len(self) -> usize {
        match self {
            Curve::X25519 | Curve::Ed25519 => 32,
            Curve::P256 => 65,
            Curve::P384 => 97,
        }
    }

    fn is_nist(self) -> bool {
        matches!(self, Curve::P256 | Curve::P384)
    }

    fn oid(self) -> &'static [u64] {
        match self {
            Curve::X25519 => OID_X25519,
            Curve::Ed25519 => OID_ED25519,
            Curve::P256 => OID_P256,
            Curve::P384 => OID_P384,
        }
    }

    fn from_algorithm(algorithm: &[u64], parameter: Option<&[u64]>) -> Option<Curve> {
        match (algorithm, parameter) {
            (a, None) if a == OID_X25519 => Some(Curve::X25519),
            (a, None) if a == OID_ED25519 => Some(Curve::Ed25519),
            (a, Some(p)) if a == OID_EC_PUBLIC_KEY && p == OID_P256 => Some(Curve::P256),
            (a, Some(p)) if a == OID_EC_PUBLIC_KEY && p == OID_P384 => Some(Curve::P384),
            _ => None,
        }
    }

    /// AlgorithmIdentifier for PKCS#8 and SPKI.
    fn algorithm_identifier(self) -> CryptoResult<Vec<u8>> {
        let encoded = if self.is_nist() {
            der::sequence(&[&der::oid(OID_EC_PUBLIC_KEY)?, &der::oid(self.oid())?])?
        } else {
            der::sequence(&[&der::oid(self.oid())?])?
        };
        Ok(encoded)
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw key bytes. The private half is zeroed on drop.
pub struct RawKeyPair {
    pub curve: Curve,
    pub private_key: Zeroizing<Vec<u8>>,
    pub public_key: Vec<u8>,
}

impl fmt::Debug for RawKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawKeyPair")
            .field("curve", &self.curve)
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

/// Generate a raw key pair.
///
/// NIST scalars are resampled until they fall in `[1, n)`.
pub fn generate_raw_key_pair(curve: Curve) -> CryptoResult<RawKeyPair> {
    let private_key = match curve {
        Curve::X25519 | Curve::Ed25519 => random_secret(curve.private_key_len()),
        Curve::P256 => loop {
            let candidate = random_secret(curve.private_key_len());
            if p256::SecretKey::from_slice(&candidate).is_ok() {
                break candidate;
            }
        },
        Curve::P384 => loop {
            let candidate = random_secret(curve.private_key_len());
            if p384::SecretKey::from_slice(&candidate).is_ok() {
                break candidate;
            }
        },
    };
    let public_key = derive_public_key(curve, &private_key)?;

    Ok(RawKeyPair {
        curve,
        private_key,
        public_key,
    })
}

/// Public key for a raw private key, by scalar multiplication on `curve`.
pub fn derive_public_key(curve: Curve, private_key: &[u8]) -> CryptoResult<Vec<u8>> {
    check_private_len(curve, private_key)?;
    let public = match curve {
        Curve::X25519 => {
            let secret = x25519_secret(private_key)?;
            x25519_dalek::PublicKey::from(&secret).as_bytes().to_vec()
        }
        Curve::Ed25519 => ed25519_signing_key(private_key)?
            .verifying_key()
            .to_bytes()
            .to_vec(),
        Curve::P256 => p256::SecretKey::from_slice(private_key)
            .map_err(|_| CryptoError::InvalidKey("P-256 scalar out of range".to_string()))?
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec(),
        Curve::P384 => p384::SecretKey::from_slice(private_key)
            .map_err(|_| CryptoError::InvalidKey("P-384 scalar out of range".to_string()))?
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec(),
    };
    Ok(public)
}

pub(crate) fn x25519_secret(private_key: &[u8]) -> CryptoResult<x25519_dalek::StaticSecret> {
    let bytes: Zeroizing<[u8; 32]> = Zeroizing::new(
        private_key
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("X25519 key must be 32 bytes".to_string()))?,
    );
    Ok(x25519_dalek::StaticSecret::from(*bytes))
}

pub(crate) fn ed25519_signing_key(private_key: &[u8]) -> CryptoResult<ed25519_dalek::SigningKey> {
    let bytes: Zeroizing<[u8; 32]> = Zeroizing::new(
        private_key
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("Ed25519 key must be 32 bytes".to_string()))?,
    );
    Ok(ed25519_dalek::SigningKey::from_bytes(&bytes))
}

/// A key pair in its DER forms.
///
/// The raw bytes exist only while the pair is generated; the PKCS#8
/// encoding is zeroed on drop.
pub struct KeyPair {
    curve: Curve,
    private_der: Zeroizing<Vec<u8>>,
    public_der: Vec<u8>,
}

impl KeyPair {
    pub fn generate(curve: Curve) -> CryptoResult<Self> {
        let raw = generate_raw_key_pair(curve)?;
        Ok(Self {
            curve,
            private_der: Zeroizing::new(encode_pkcs8(&raw.private_key, &raw.public_key, curve)?),
            public_der: encode_spki(&raw.public_key, curve)?,
        })
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// PKCS#8 DER.
    pub fn private_der(&self) -> &[u8] {
        &self.private_der
    }

    /// SPKI DER.
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_der)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("curve", &self.curve)
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Short identifier for a public key: first 16 bytes of BLAKE3 over the SPKI, hex.
pub fn fingerprint(public_der: &[u8]) -> String {
    let hash = blake3::hash(public_der);
    hex::encode(&hash.as_bytes()[..16])
}

fn check_private_len(curve: Curve, private_key: &[u8]) -> CryptoResult<()> {
    if private_key.len() != curve.private_key_len() {
        return Err(CryptoError::InvalidKey(format!(
            "{curve} private key must be {} bytes, got {}",
            curve.private_key_len(),
            private_key.len()
        )));
    }
    Ok(())
}

fn check_public_len(curve: Curve, public_key: &[u8]) -> CryptoResult<()> {
    if public_key.len() != curve.public_key_len() {
        return Err(CryptoError::InvalidKey(format!(
            "{curve} public key must be {} bytes, got {}",
            curve.public_key_len(),
            public_key.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// PKCS#8 `PrivateKeyInfo`.
///
/// X25519 and Ed25519 keys carry only the private scalar (RFC 8410), so
/// `public_key` is embedded for the NIST curves only.
pub fn encode_pkcs8(private_key: &[u8], public_key: &[u8], curve: Curve) -> CryptoResult<Vec<u8>> {
    check_private_len(curve, private_key)?;
    check_public_len(curve, public_key)?;

    let inner = if curve.is_nist() {
        Zeroizing::new(der::sequence(&[
            &der::integer(EC_PRIVATE_KEY_VERSION)?,
            &der::octet_string(private_key)?,
            &der::context_specific(0, &der::oid(curve.oid())?)?,
            &der::context_specific(1, &der::bit_string(public_key)?)?,
        ])?)
    } else {
        Zeroizing::new(der::octet_string(private_key)?)
    };
    let wrapped = Zeroizing::new(der::octet_string(&inner)?);

    Ok(der::sequence(&[
        &der::integer(PKCS8_VERSION)?,
        &curve.algorithm_identifier()?,
        &wrapped,
    ])?)
}

/// `SubjectPublicKeyInfo`.
pub fn encode_spki(public_key: &[u8], curve: Curve) -> CryptoResult<Vec<u8>> {
    check_public_len(curve, public_key)?;
    Ok(der::sequence(&[
        &curve.algorithm_identifier()?,
        &der::bit_string(public_key)?,
    ])?)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn read_algorithm(reader: &mut DerReader<'_>) -> CryptoResult<Option<Curve>> {
    let mut algorithm = reader.read_sequence()?;
    let oid = algorithm.read_oid()?;
    let parameter = if algorithm.is_empty() {
        None
    } else {
        Some(algorithm.read_oid()?)
    };
    Ok(Curve::from_algorithm(&oid, parameter.as_deref()))
}

fn expect_curve(found: Option<Curve>, expected: Curve) -> CryptoResult<()> {
    match found {
        Some(curve) if curve == expected => Ok(()),
        Some(curve) => Err(CryptoError::CurveMismatch {
            expected: expected.to_string(),
            found: curve.to_string(),
        }),
        None => Err(CryptoError::CurveMismatch {
            expected: expected.to_string(),
            found: "unknown algorithm".to_string(),
        }),
    }
}

/// Raw private key from PKCS#8.
///
/// Structural decoding is tried first. If the DER itself is malformed, a
/// byte-pattern scan is attempted and a warning is logged when it succeeds.
/// Curve mismatches never fall back.
pub fn parse_pkcs8(der: &[u8], curve: Curve) -> CryptoResult<Zeroizing<Vec<u8>>> {
    match parse_pkcs8_strict(der, curve) {
        Ok(key) => Ok(key),
        Err(CryptoError::Der(strict_error)) => match scan_private_key(der, curve) {
            Some(key) => {
                warn!(
                    curve = %curve,
                    error = %strict_error,
                    "PKCS#8 structural decode failed, key recovered by compatibility scan"
                );
                Ok(Zeroizing::new(key.to_vec()))
            }
            None => Err(CryptoError::Der(strict_error)),
        },
        Err(e) => Err(e),
    }
}

fn parse_pkcs8_strict(der: &[u8], curve: Curve) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let mut outer = DerReader::new(der);
    let mut info = outer.read_sequence()?;
    outer.finish()?;

    let version = info.read_integer()?;
    if version != PKCS8_VERSION && version != PKCS8_VERSION_WITH_PUBLIC {
        return Err(DerError::IntegerOutOfRange(u64::from(version)).into());
    }
    expect_curve(read_algorithm(&mut info)?, curve)?;
    let wrapped = info.read_octet_string()?;

    let mut inner = DerReader::new(wrapped);
    let private_key = if curve.is_nist() {
        let mut ec_private = inner.read_sequence()?;
        let ec_version = ec_private.read_integer()?;
        if ec_version != EC_PRIVATE_KEY_VERSION {
            return Err(DerError::IntegerOutOfRange(u64::from(ec_version)).into());
        }
        ec_private.read_octet_string()?
    } else {
        inner.read_octet_string()?
    };
    inner.finish()?;

    check_private_len(curve, private_key)?;
    Ok(Zeroizing::new(private_key.to_vec()))
}

fn scan_private_key(der: &[u8], curve: Curve) -> Option<&[u8]> {
    let len = curve.private_key_len();
    if curve.is_nist() {
        lenient_ec_private_key(der)
            .and_then(|body| body.find_octet_string(|content| content.len() == len))
            .or_else(|| compat::scan_octet_string_of_len(der, len))
    } else {
        compat::find_after_marker(der, &CURVE_PRIVATE_KEY_MARKER, len)
    }
}

/// Body of the embedded ECPrivateKey, ignoring version and algorithm values.
fn lenient_ec_private_key(der: &[u8]) -> Option<DerReader<'_>> {
    let mut info = DerReader::new(der).read_sequence().ok()?;
    info.skip().ok()?;
    info.skip().ok()?;
    let wrapped = info.read_octet_string().ok()?;
    DerReader::new(wrapped).read_sequence().ok()
}

/// Raw public key from SPKI. No compatibility fallback.
pub fn parse_spki(der: &[u8], curve: Curve) -> CryptoResult<Vec<u8>> {
    let mut outer = DerReader::new(der);
    let mut info = outer.read_sequence()?;
    outer.finish()?;

    expect_curve(read_algorithm(&mut info)?, curve)?;
    let public_key = info.read_bit_string()?;
    info.finish()?;

    check_public_len(curve, public_key)?;
    match curve {
        Curve::P256 => {
            p256::PublicKey::from_sec1_bytes(public_key)
                .map_err(|_| CryptoError::InvalidKey("P-256 point not on curve".to_string()))?;
        }
        Curve::P384 => {
            p384::PublicKey::from_sec1_bytes(public_key)
                .map_err(|_| CryptoError::InvalidKey("P-384 point not on curve".to_string()))?;
        }
        Curve::X25519 | Curve::Ed25519 => {}
    }
    Ok(public_key.to_vec())
}
