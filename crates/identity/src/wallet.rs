//! Wallet data model.
//!
//! The in-memory [`Wallet`] never holds the signing private key or the
//! anonymizing key. Those live only in the secure key store.

use std::collections::BTreeMap;

use idwallet_core::protocol_time;
use idwallet_crypto::{fingerprint, random_bytes, HashingScheme, SigningScheme};
use serde::{Deserialize, Serialize};

use crate::encoding::{self, base64_bytes, scheme_id};
use crate::error::IdentityResult;

/// Pseudo-attribute resolved per requester from the anonymizing key.
pub const ANONYMOUS_ID_ATTRIBUTE: &str = "anonymous_id";

pub const DATE_OF_BIRTH_ATTRIBUTE: &str = "date_of_birth";

/// Random bytes per salt before encoding.
pub const SALT_BYTES: usize = 32;

/// Presentation order for well-known attributes. Others follow alphabetically.
const DISPLAY_ORDER: &[&str] = &[
    "first_name",
    "last_name",
    "date_of_birth",
    "age_over_18",
    "age_over_21",
    "nationality",
    "email",
    "phone_number",
    "address",
    ANONYMOUS_ID_ATTRIBUTE,
];

/// Fresh random salt: 32 bytes, URL-safe base64 without padding.
pub fn generate_salt() -> String {
    encoding::encode_url_safe(&random_bytes(SALT_BYTES))
}

/// Order attribute names for display.
///
/// Never use this order for commitments; the challenge order is authoritative there.
pub fn sort_attribute_keys<S: AsRef<str>>(keys: &[S]) -> Vec<String> {
    let mut sorted: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
    sorted.sort_by(|a, b| {
        let rank = |name: &str| {
            DISPLAY_ORDER
                .iter()
                .position(|known| *known == name)
                .unwrap_or(DISPLAY_ORDER.len())
        };
        rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
    });
    sorted
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub value: String,
    pub salt: String,
}

impl Attribute {
    /// New attribute with its own salt.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            salt: generate_salt(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletUsage {
    pub challenges_accepted: u64,
    pub challenges_rejected: u64,
    pub last_used_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    /// SPKI of the wallet signing key
    #[serde(with = "base64_bytes")]
    pub public_key: Vec<u8>,
    #[serde(rename = "signing_algorithm", with = "scheme_id")]
    pub signing_scheme: SigningScheme,
    #[serde(rename = "identity_attribute_hashing_scheme", with = "scheme_id")]
    pub attribute_hashing_scheme: HashingScheme,
    #[serde(with = "scheme_id")]
    pub anonymizing_hashing_scheme: HashingScheme,
    pub attributes: BTreeMap<String, Attribute>,
    #[serde(default)]
    pub usage: WalletUsage,
}

impl Wallet {
    /// Build a wallet, salting every attribute independently.
    pub fn new(
        id: impl Into<String>,
        public_key: Vec<u8>,
        signing_scheme: SigningScheme,
        attribute_hashing_scheme: HashingScheme,
        anonymizing_hashing_scheme: HashingScheme,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        let now = protocol_time();
        Self {
            id: id.into(),
            created_at: now.clone(),
            updated_at: now,
            public_key,
            signing_scheme,
            attribute_hashing_scheme,
            anonymizing_hashing_scheme,
            attributes: attributes
                .into_iter()
                .map(|(name, value)| (name, Attribute::new(value)))
                .collect(),
            usage: WalletUsage::default(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Attribute names in display order.
    pub fn display_keys(&self) -> Vec<String> {
        let keys: Vec<&String> = self.attributes.keys().collect();
        sort_attribute_keys(&keys)
    }

    /// Merge server-derived attributes. An attribute already held keeps its
    /// salt; new attributes get a fresh one.
    pub fn merge_attributes<I>(&mut self, incoming: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in incoming {
            match self.attributes.get_mut(&name) {
                Some(existing) => existing.value = value,
                None => {
                    self.attributes.insert(name, Attribute::new(value));
                }
            }
        }
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = protocol_time();
    }

    pub fn record_accepted(&mut self) {
        self.usage.challenges_accepted += 1;
        self.record_use();
    }

    pub fn record_rejected(&mut self) {
        self.usage.challenges_rejected += 1;
        self.record_use();
    }

    fn record_use(&mut self) {
        let now = protocol_time();
        self.usage.last_used_at = Some(now.clone());
        self.updated_at = now;
    }

    /// BLAKE3 fingerprint of the public key, for logs.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key)
    }

    /// JSON with alphabetically sorted keys at every level.
    pub fn to_record_bytes(&self) -> IdentityResult<Vec<u8>> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_vec(&value)?)
    }

    pub fn from_record_bytes(bytes: &[u8]) -> IdentityResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
