//! Base64 and scheme-identifier encodings for the wire and the wallet record.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use zeroize::Zeroizing;

use crate::error::IdentityResult;

/// Standard base64, used for every binary field on the wire.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(value: &str) -> IdentityResult<Vec<u8>> {
    Ok(STANDARD.decode(value)?)
}

/// Decode into a buffer that is zeroed on drop.
pub fn decode_secret(value: &str) -> IdentityResult<Zeroizing<Vec<u8>>> {
    Ok(Zeroizing::new(STANDARD.decode(value)?))
}

/// URL-safe base64 without padding, used for salts and nonces.
pub fn encode_url_safe(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Serde adapter for `Vec<u8>` fields stored as standard base64.
pub mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let value = String::deserialize(deserializer)?;
        super::decode(&value).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for scheme enums stored by identifier.
pub mod scheme_id {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T: Display, S: Serializer>(scheme: &T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(scheme)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
