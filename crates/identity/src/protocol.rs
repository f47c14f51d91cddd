//! Identity Challenge Protocol.
//!
//! [`IdentityProtocol`] drives registration, claim, accept, reject,
//! anonymizing-key rotation and age refresh against a [`WalletApi`]. Wallet
//! state is carried by an explicit [`WalletSession`] owned by the caller.
//! Operations on one session must be serialized by the caller.
//!
//! Every signature is produced inside the key store's scoped accessor, so the
//! signing key never outlives the call that uses it.

use std::collections::BTreeMap;

use chrono::Utc;
use idwallet_core::{protocol_time, WalletConfig};
use idwallet_crypto::keys::parse_spki;
use idwallet_crypto::{encrypting, hashing, signing, HashingScheme, SigningScheme};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::api::{
    AcceptRequest, CheckAgeRequest, ClaimRequest, ClaimResponse, RegisterRequest, RejectRequest,
    ResetAnonymizingKeyRequest,
};
use crate::canonical::{self, protocol_nonce};
use crate::challenge::{Challenge, ChallengeSession, Claim};
use crate::client::{HttpWalletApi, WalletApi};
use crate::disclosure::{build_disclosure, build_rejection_hash, Disclosure};
use crate::encoding;
use crate::error::{ApiError, ApiErrorCode, ApiOperation, IdentityError, IdentityResult};
use crate::secure_store::{SecureEnclave, SecureKeyStore};
use crate::wallet::{Wallet, ANONYMOUS_ID_ATTRIBUTE, DATE_OF_BIRTH_ATTRIBUTE};

/// Typed protocol parameters resolved from [`WalletConfig`].
#[derive(Debug, Clone)]
pub struct ProtocolSettings {
    pub signing_scheme: SigningScheme,
    /// Used when the authority does not name a scheme at registration
    pub attribute_hashing_scheme: HashingScheme,
    pub authority_signing_scheme: SigningScheme,
    /// SPKI of the authority's signing key
    pub authority_public_key: Vec<u8>,
}

impl ProtocolSettings {
    pub fn from_config(config: &WalletConfig) -> IdentityResult<Self> {
        let signing_scheme = config.schemes.signing.parse::<SigningScheme>()?;
        let attribute_hashing_scheme = config.schemes.attribute_hashing.parse::<HashingScheme>()?;
        let authority_signing_scheme = config.authority.signing_scheme.parse::<SigningScheme>()?;

        if config.authority.public_key.trim().is_empty() {
            return Err(IdentityError::Config(
                "authority.public_key must be set".to_string(),
            ));
        }
        let authority_public_key = encoding::decode(config.authority.public_key.trim())?;
        parse_spki(&authority_public_key, authority_signing_scheme.curve())?;

        Ok(Self {
            signing_scheme,
            attribute_hashing_scheme,
            authority_signing_scheme,
            authority_public_key,
        })
    }
}

/// A loaded wallet together with the store that holds its secrets.
pub struct WalletSession<E: SecureEnclave> {
    store: SecureKeyStore<E>,
    wallet: Wallet,
}

impl<E: SecureEnclave> WalletSession<E> {
    /// Load the wallet held by `store`.
    pub async fn open(store: SecureKeyStore<E>) -> IdentityResult<Self> {
        let wallet = store.load().await?;
        Ok(Self { store, wallet })
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn store(&self) -> &SecureKeyStore<E> {
        &self.store
    }

    pub fn into_store(self) -> SecureKeyStore<E> {
        self.store
    }

    async fn sign(&self, message: &str) -> IdentityResult<String> {
        let scheme = self.wallet.signing_scheme;
        let signature = self
            .store
            .with_signing_key(|key| signing::sign(scheme, key, message.as_bytes()))
            .await??;
        Ok(encoding::encode(&signature))
    }

    /// Per-requester pseudonym: base64 of `HMAC(anonymizing_key, requester_id)`.
    async fn anonymous_id(&self, requester_id: &str) -> IdentityResult<String> {
        let scheme = self.wallet.anonymizing_hashing_scheme;
        let digest = self
            .store
            .with_anonymizing_key(|key| hashing::hash(scheme, key, requester_id.as_bytes()))
            .await??;
        Ok(encoding::encode(&digest))
    }

    /// Resolve the challenge's attributes, deriving the pseudonym only when asked for.
    async fn disclose(&self, claim: &Claim, challenge: &Challenge) -> IdentityResult<Disclosure> {
        let anonymous_id = if challenge
            .identity_attributes
            .iter()
            .any(|name| name == ANONYMOUS_ID_ATTRIBUTE)
        {
            Some(self.anonymous_id(&claim.requester_id).await?)
        } else {
            None
        };
        build_disclosure(
            &self.wallet,
            &challenge.id,
            &challenge.identity_attributes,
            anonymous_id.as_deref(),
        )
    }
}

pub struct IdentityProtocol<A: WalletApi> {
    api: A,
    settings: ProtocolSettings,
}

impl IdentityProtocol<HttpWalletApi> {
    pub fn from_config(config: &WalletConfig) -> IdentityResult<Self> {
        let settings = ProtocolSettings::from_config(config)?;
        Ok(Self::new(HttpWalletApi::from_config(&config.api), settings))
    }
}

impl<A: WalletApi> IdentityProtocol<A> {
    pub fn new(api: A, settings: ProtocolSettings) -> Self {
        Self { api, settings }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    /// Register a new wallet holding `attributes` and persist it in `store`.
    pub async fn register<E: SecureEnclave>(
        &self,
        store: SecureKeyStore<E>,
        attributes: BTreeMap<String, String>,
    ) -> IdentityResult<WalletSession<E>> {
        if store.exists().await? {
            return Err(IdentityError::WalletExists);
        }

        let signing_scheme = self.settings.signing_scheme;
        let key_pair = signing_scheme.generate_key_pair()?;
        let request = RegisterRequest {
            signing_scheme: signing_scheme.to_string(),
            signing_public_key: encoding::encode(key_pair.public_der()),
            time: protocol_time(),
            nonce: protocol_nonce(),
        };
        let response = self.api.register(&request).await?;

        let attribute_hashing_scheme = if response.identity_attribute_hashing_scheme.is_empty() {
            self.settings.attribute_hashing_scheme
        } else {
            response
                .identity_attribute_hashing_scheme
                .parse::<HashingScheme>()?
        };
        if attribute_hashing_scheme != self.settings.attribute_hashing_scheme {
            warn!(
                configured = %self.settings.attribute_hashing_scheme,
                assigned = %attribute_hashing_scheme,
                "Authority assigned a different attribute hashing scheme"
            );
        }
        let anonymizing_hashing_scheme = response
            .anonymizing_hashing_scheme
            .parse::<HashingScheme>()?;
        let anonymizing_key = encoding::decode_secret(&response.anonymizing_key)?;

        let wallet = Wallet::new(
            response.wallet_id,
            key_pair.public_der().to_vec(),
            signing_scheme,
            attribute_hashing_scheme,
            anonymizing_hashing_scheme,
            attributes,
        );
        store
            .create(&wallet, key_pair.private_der(), &anonymizing_key)
            .await?;

        info!(
            wallet_id = %wallet.id,
            fingerprint = %wallet.fingerprint(),
            signing_scheme = %signing_scheme,
            "Wallet registered"
        );
        Ok(WalletSession { store, wallet })
    }

    /// Claim `challenge_id` for this wallet.
    ///
    /// The returned challenge and claim are trusted only after both issuer
    /// signatures verify against the configured authority key.
    pub async fn claim<E: SecureEnclave>(
        &self,
        session: &WalletSession<E>,
        challenge_id: &str,
    ) -> IdentityResult<ChallengeSession> {
        let wallet = session.wallet();
        let time = protocol_time();
        let nonce = protocol_nonce();
        let message = canonical::claim_string(&time, &nonce, challenge_id, &wallet.id);
        let wallet_signature = session.sign(&message).await?;

        let request = ClaimRequest {
            time,
            nonce,
            challenge_id: challenge_id.to_string(),
            wallet_id: wallet.id.clone(),
            wallet_signature,
        };
        let ClaimResponse { claim, challenge } = self.api.claim(&request).await?;

        self.verify_claimed(challenge_id, &claim, &challenge)?;
        challenge.encrypting_scheme()?;

        let mut state = ChallengeSession::new(challenge_id);
        if challenge.is_expired(Utc::now())? {
            state.on_expired()?;
            warn!(challenge_id, expires_at = %challenge.expires_at, "Claimed challenge already expired");
            return Err(IdentityError::ChallengeExpired {
                challenge_id: challenge.id,
                expires_at: challenge.expires_at,
            });
        }

        info!(
            wallet_id = %wallet.id,
            challenge_id,
            requester_id = %claim.requester_id,
            requester_type = claim.requester_type.as_str(),
            attributes = challenge.identity_attributes.len(),
            "Challenge claimed"
        );
        state.on_claimed(claim, challenge)?;
        Ok(state)
    }

    /// Disclose the requested attributes to the requester.
    ///
    /// Attributes the wallet does not hold are sent as `null`. The payload is
    /// sealed to the requester under a fresh ephemeral key.
    pub async fn accept<E: SecureEnclave>(
        &self,
        session: &mut WalletSession<E>,
        state: &mut ChallengeSession,
    ) -> IdentityResult<()> {
        let (claim, challenge) = claimed_pair(state)?;
        ensure_live(state, &challenge)?;

        let scheme = challenge.encrypting_scheme()?;
        let requester_key = encoding::decode(&claim.requester_public_key)?;
        let disclosure = session.disclose(&claim, &challenge).await?;

        let payload = Zeroizing::new(serde_json::to_vec(&disclosure.payload)?);
        let sealed = encrypting::seal(scheme, &requester_key, &payload)?;

        let anonymizing_key = if disclosure.salts.contains_key(ANONYMOUS_ID_ATTRIBUTE) {
            Some(
                session
                    .store
                    .with_anonymizing_key(|key| encoding::encode(key))
                    .await?,
            )
        } else {
            None
        };

        let mut request = AcceptRequest {
            time: protocol_time(),
            nonce: protocol_nonce(),
            challenge_id: challenge.id.clone(),
            wallet_id: session.wallet.id.clone(),
            identity_hash: encoding::encode(&disclosure.identity_hash),
            identity_attribute_hashing_salts: disclosure.salts.clone(),
            identity_encrypting_wallet_key: encoding::encode(&sealed.ephemeral_public_key),
            identity_encrypting_nonce: encoding::encode(&sealed.nonce),
            identity_encrypted: encoding::encode(&sealed.ciphertext),
            anonymizing_key,
            wallet_signature: String::new(),
        };
        let submitted = match session.sign(&canonical::accept_string(&request)).await {
            Ok(signature) => {
                request.wallet_signature = signature;
                self.api.accept(&request).await.map_err(IdentityError::from)
            }
            Err(err) => Err(err),
        };
        request.wipe_anonymizing_key();
        submitted?;

        state.on_accepted()?;
        session.wallet.record_accepted();
        session.store.save(&session.wallet).await?;

        info!(
            wallet_id = %session.wallet.id,
            challenge_id = %challenge.id,
            requester_id = %claim.requester_id,
            disclosed = disclosure.disclosed_count(),
            withheld = disclosure.withheld().len(),
            "Challenge accepted"
        );
        Ok(())
    }

    /// Decline the challenge, proving with the identity hash that the wallet could answer.
    ///
    /// The hash covers held attributes only, so the anonymizing key is not read.
    pub async fn reject<E: SecureEnclave>(
        &self,
        session: &mut WalletSession<E>,
        state: &mut ChallengeSession,
    ) -> IdentityResult<()> {
        let (claim, challenge) = claimed_pair(state)?;
        ensure_live(state, &challenge)?;

        let identity_hash =
            build_rejection_hash(&session.wallet, &challenge.id, &challenge.identity_attributes)?;
        let mut request = RejectRequest {
            time: protocol_time(),
            nonce: protocol_nonce(),
            challenge_id: challenge.id.clone(),
            wallet_id: session.wallet.id.clone(),
            identity_hash: encoding::encode(&identity_hash),
            wallet_signature: String::new(),
        };
        request.wallet_signature = session.sign(&canonical::reject_string(&request)).await?;

        self.api.reject(&request).await?;

        state.on_rejected()?;
        session.wallet.record_rejected();
        session.store.save(&session.wallet).await?;

        info!(
            wallet_id = %session.wallet.id,
            challenge_id = %challenge.id,
            requester_id = %claim.requester_id,
            "Challenge rejected"
        );
        Ok(())
    }

    /// Rotate the anonymizing key. The local key is replaced only after the
    /// authority confirms the rotation.
    pub async fn reset_anonymizing_key<E: SecureEnclave>(
        &self,
        session: &mut WalletSession<E>,
    ) -> IdentityResult<()> {
        let time = protocol_time();
        let nonce = protocol_nonce();
        let message = canonical::reset_anonymizing_key_string(&time, &nonce, &session.wallet.id);
        let request = ResetAnonymizingKeyRequest {
            time,
            nonce,
            wallet_id: session.wallet.id.clone(),
            wallet_signature: session.sign(&message).await?,
        };

        let response = self.api.reset_anonymizing_key(&request).await?;
        check_wallet_id(
            ApiOperation::ResetAnonymizingKey,
            &session.wallet.id,
            &response.wallet_id,
        )?;
        let scheme = response.anonymizing_hashing_scheme.parse::<HashingScheme>()?;
        let anonymizing_key = encoding::decode_secret(&response.anonymizing_key)?;

        session.store.replace_anonymizing_key(&anonymizing_key).await?;
        if scheme != session.wallet.anonymizing_hashing_scheme {
            debug!(from = %session.wallet.anonymizing_hashing_scheme, to = %scheme, "Anonymizing scheme changed");
            session.wallet.anonymizing_hashing_scheme = scheme;
        }
        session.wallet.touch();
        session.store.save(&session.wallet).await?;

        info!(wallet_id = %session.wallet.id, "Anonymizing key rotated");
        Ok(())
    }

    /// Ask the authority for age-derived attributes and merge them into the wallet.
    pub async fn refresh_age<E: SecureEnclave>(
        &self,
        session: &mut WalletSession<E>,
    ) -> IdentityResult<u32> {
        let date_of_birth = session
            .wallet
            .attribute(DATE_OF_BIRTH_ATTRIBUTE)
            .cloned()
            .ok_or_else(|| IdentityError::MissingAttribute(DATE_OF_BIRTH_ATTRIBUTE.to_string()))?;

        let mut request = CheckAgeRequest {
            time: protocol_time(),
            nonce: protocol_nonce(),
            wallet_id: session.wallet.id.clone(),
            date_of_birth: date_of_birth.value,
            date_of_birth_salt: date_of_birth.salt,
            wallet_signature: String::new(),
        };
        request.wallet_signature = session.sign(&canonical::check_age_string(&request)).await?;

        let response = self.api.check_age(&request).await?;
        check_wallet_id(ApiOperation::CheckAge, &session.wallet.id, &response.wallet_id)?;

        let derived = response.identity_attributes.len();
        session.wallet.merge_attributes(response.identity_attributes);
        session.store.save(&session.wallet).await?;

        info!(wallet_id = %session.wallet.id, derived, "Age attributes refreshed");
        Ok(response.age)
    }

    fn verify_claimed(
        &self,
        challenge_id: &str,
        claim: &Claim,
        challenge: &Challenge,
    ) -> IdentityResult<()> {
        let untrusted = |reason: &str| {
            warn!(challenge_id, reason, "Rejecting untrusted challenge");
            IdentityError::UntrustedChallenge {
                challenge_id: challenge_id.to_string(),
                reason: reason.to_string(),
            }
        };

        if challenge.id != challenge_id {
            return Err(untrusted("challenge id does not match the claimed id"));
        }
        let scheme = self.settings.authority_signing_scheme;
        let authority_key = &self.settings.authority_public_key;
        if !challenge.verify_issuer(scheme, authority_key) {
            return Err(untrusted("challenge issuer signature is invalid"));
        }
        if !claim.verify_issuer(challenge_id, scheme, authority_key) {
            return Err(untrusted("claim issuer signature is invalid"));
        }
        Ok(())
    }
}

fn claimed_pair(state: &ChallengeSession) -> IdentityResult<(Claim, Challenge)> {
    let (claim, challenge) = state.claimed()?;
    Ok((claim.clone(), challenge.clone()))
}

fn ensure_live(state: &mut ChallengeSession, challenge: &Challenge) -> IdentityResult<()> {
    if challenge.is_expired(Utc::now())? {
        state.on_expired()?;
        warn!(challenge_id = %challenge.id, expires_at = %challenge.expires_at, "Challenge expired");
        return Err(IdentityError::ChallengeExpired {
            challenge_id: challenge.id.clone(),
            expires_at: challenge.expires_at.clone(),
        });
    }
    Ok(())
}

fn check_wallet_id(operation: ApiOperation, expected: &str, returned: &str) -> IdentityResult<()> {
    if expected != returned {
        return Err(ApiError::new(operation, ApiErrorCode::InvalidResponse)
            .with_body(format!("response names wallet {returned}, expected {expected}"))
            .into());
    }
    Ok(())
}
