//! Test utilities for wallet protocol integration tests

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use idwallet_core::{format_protocol_time, logging, protocol_time, LoggingConfig};
use idwallet_crypto::{
    encrypting, random_bytes, signing, EncryptingScheme, HashingScheme, KeyPair, SealedPayload,
    SigningScheme,
};
use idwallet_identity::canonical;
use idwallet_identity::encoding;
use idwallet_identity::{
    AcceptRequest, ApiError, ApiErrorCode, ApiOperation, Challenge, CheckAgeRequest,
    CheckAgeResponse, Claim, ClaimRequest, ClaimResponse, InMemoryEnclave, ProtocolSettings,
    RegisterRequest, RegisterResponse, RejectRequest, RequesterType, ResetAnonymizingKeyRequest,
    ResetAnonymizingKeyResponse, SecureKeyStore, WalletApi,
};

/// Install a test subscriber once; repeated calls are ignored.
pub fn init_tracing() {
    let config = LoggingConfig {
        filter: "warn".to_string(),
        ..LoggingConfig::default()
    };
    let Ok(filter) = logging::env_filter(&config) else {
        return;
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Key store backed by an in-memory enclave and a unique temp file.
pub fn temp_store() -> SecureKeyStore<InMemoryEnclave> {
    let path: PathBuf = std::env::temp_dir()
        .join(format!("idwallet_it_{}", uuid::Uuid::new_v4()))
        .join("wallet.enc");
    SecureKeyStore::new(InMemoryEnclave::new(), path)
}

pub async fn remove_store(store: &SecureKeyStore<InMemoryEnclave>) {
    if let Some(dir) = store.wallet_path().parent() {
        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}

/// A relying party that asks for attributes and decrypts what it receives.
pub struct TestRequester {
    pub id: String,
    pub name: String,
    pub scheme: EncryptingScheme,
    pub key_pair: KeyPair,
}

impl TestRequester {
    pub fn new(id: &str, scheme: EncryptingScheme) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Requester {id}"),
            scheme,
            key_pair: scheme.generate_key_pair().unwrap(),
        }
    }

    /// Decrypt the disclosed payload of an accept request.
    pub fn open(&self, request: &AcceptRequest) -> serde_json::Value {
        let nonce: [u8; encrypting::NONCE_SIZE] = encoding::decode(&request.identity_encrypting_nonce)
            .unwrap()
            .try_into()
            .unwrap();
        let sealed = SealedPayload {
            ephemeral_public_key: encoding::decode(&request.identity_encrypting_wallet_key).unwrap(),
            nonce,
            ciphertext: encoding::decode(&request.identity_encrypted).unwrap(),
        };
        let plaintext = encrypting::open(self.scheme, self.key_pair.private_der(), &sealed).unwrap();
        serde_json::from_slice(&plaintext).unwrap()
    }
}

#[derive(Clone)]
pub struct RegisteredWallet {
    pub signing_scheme: SigningScheme,
    pub public_key: Vec<u8>,
    pub anonymizing_key: Vec<u8>,
}

struct IssuedChallenge {
    challenge: Challenge,
    claim: Claim,
}

#[derive(Default)]
struct AuthorityState {
    wallets: HashMap<String, RegisteredWallet>,
    challenges: HashMap<String, IssuedChallenge>,
    accepted: Vec<AcceptRequest>,
    rejected: Vec<RejectRequest>,
    fail_next: Option<(ApiErrorCode, u16)>,
    next_id: u32,
}

/// In-process coordinating authority.
///
/// Verifies wallet signatures the way the real service does, by rebuilding
/// the canonical string from the request body.
#[derive(Clone)]
pub struct MockAuthority {
    scheme: SigningScheme,
    key_pair: Arc<KeyPair>,
    state: Arc<Mutex<AuthorityState>>,
}

impl MockAuthority {
    pub fn new() -> Self {
        Self::with_scheme(SigningScheme::EdDsaEd25519)
    }

    pub fn with_scheme(scheme: SigningScheme) -> Self {
        Self {
            scheme,
            key_pair: Arc::new(scheme.generate_key_pair().unwrap()),
            state: Arc::new(Mutex::new(AuthorityState::default())),
        }
    }

    /// Settings a wallet needs to trust this authority.
    pub fn settings(&self, signing_scheme: SigningScheme) -> ProtocolSettings {
        ProtocolSettings {
            signing_scheme,
            attribute_hashing_scheme: HashingScheme::HmacSha256,
            authority_signing_scheme: self.scheme,
            authority_public_key: self.key_pair.public_der().to_vec(),
        }
    }

    fn sign(&self, message: &str) -> String {
        let signature = signing::sign(self.scheme, self.key_pair.private_der(), message.as_bytes()).unwrap();
        encoding::encode(&signature)
    }

    /// Issue a signed challenge and claim for `requester`, valid for `ttl`.
    pub fn issue_challenge(
        &self,
        requester: &TestRequester,
        attributes: &[&str],
        ttl: chrono::Duration,
    ) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("chl_{:04}", state.next_id);

        let mut challenge = Challenge {
            id: id.clone(),
            identity_attributes: attributes.iter().map(|a| a.to_string()).collect(),
            identity_encrypting_scheme: requester.scheme.to_string(),
            expires_at: format_protocol_time(Utc::now() + ttl),
            issuer_signature: String::new(),
        };
        challenge.issuer_signature = self.sign(&challenge.signing_string());

        let mut claim = Claim {
            requester_id: requester.id.clone(),
            requester_name: requester.name.clone(),
            requester_type: RequesterType::Application,
            requester_public_key: encoding::encode(requester.key_pair.public_der()),
            time: protocol_time(),
            issuer_signature: String::new(),
        };
        claim.issuer_signature = self.sign(&claim.signing_string(&id));

        state.challenges.insert(id.clone(), IssuedChallenge { challenge, claim });
        id
    }

    /// Alter a challenge after it was signed.
    pub fn tamper_challenge(&self, challenge_id: &str, extra_attribute: &str) {
        let mut state = self.state.lock().unwrap();
        let issued = state.challenges.get_mut(challenge_id).unwrap();
        issued
            .challenge
            .identity_attributes
            .push(extra_attribute.to_string());
    }

    /// Replace the key the authority holds for `wallet_id`.
    pub fn replace_wallet_key(&self, wallet_id: &str) {
        let fresh = SigningScheme::EdDsaEd25519.generate_key_pair().unwrap();
        let mut state = self.state.lock().unwrap();
        let wallet = state.wallets.get_mut(wallet_id).unwrap();
        wallet.signing_scheme = SigningScheme::EdDsaEd25519;
        wallet.public_key = fresh.public_der().to_vec();
    }

    /// Fail the next call with `code` and `status`.
    pub fn fail_next(&self, code: ApiErrorCode, status: u16) {
        self.state.lock().unwrap().fail_next = Some((code, status));
    }

    pub fn wallet(&self, wallet_id: &str) -> Option<RegisteredWallet> {
        self.state.lock().unwrap().wallets.get(wallet_id).cloned()
    }

    pub fn accepted(&self) -> Vec<AcceptRequest> {
        self.state.lock().unwrap().accepted.clone()
    }

    pub fn rejected(&self) -> Vec<RejectRequest> {
        self.state.lock().unwrap().rejected.clone()
    }

    pub fn challenge(&self, challenge_id: &str) -> Challenge {
        self.state.lock().unwrap().challenges[challenge_id].challenge.clone()
    }

    fn take_failure(&self, operation: ApiOperation) -> Result<(), ApiError> {
        match self.state.lock().unwrap().fail_next.take() {
            Some((code, status)) => Err(ApiError::new(operation, code)
                .with_status(status)
                .with_body("injected failure")),
            None => Ok(()),
        }
    }

    fn verify_wallet(
        &self,
        operation: ApiOperation,
        wallet_id: &str,
        message: &str,
        signature: &str,
    ) -> Result<RegisteredWallet, ApiError> {
        let wallet = self.wallet(wallet_id).ok_or_else(|| {
            ApiError::new(operation, ApiErrorCode::Unauthorized)
                .with_status(401)
                .with_body("unknown wallet")
        })?;
        let valid = encoding::decode(signature)
            .map(|sig| signing::verify(wallet.signing_scheme, &wallet.public_key, message.as_bytes(), &sig))
            .unwrap_or(false);
        if !valid {
            return Err(ApiError::new(operation, ApiErrorCode::InvalidSignature)
                .with_status(400)
                .with_body("wallet signature does not verify"));
        }
        Ok(wallet)
    }
}

impl Default for MockAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletApi for MockAuthority {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        self.take_failure(ApiOperation::Register)?;
        let invalid = || ApiError::new(ApiOperation::Register, ApiErrorCode::RequestFailed).with_status(400);
        let signing_scheme = request.signing_scheme.parse::<SigningScheme>().map_err(|_| invalid())?;
        let public_key = encoding::decode(&request.signing_public_key).map_err(|_| invalid())?;

        let anonymizing_key = random_bytes(32);
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let wallet_id = format!("wal_{:04}", state.next_id);
        state.wallets.insert(
            wallet_id.clone(),
            RegisteredWallet {
                signing_scheme,
                public_key,
                anonymizing_key: anonymizing_key.clone(),
            },
        );

        Ok(RegisterResponse {
            wallet_id,
            anonymizing_key: encoding::encode(&anonymizing_key),
            anonymizing_hashing_scheme: HashingScheme::HmacSha256.to_string(),
            identity_attribute_hashing_scheme: HashingScheme::HmacSha256.to_string(),
        })
    }

    async fn reset_anonymizing_key(
        &self,
        request: &ResetAnonymizingKeyRequest,
    ) -> Result<ResetAnonymizingKeyResponse, ApiError> {
        let operation = ApiOperation::ResetAnonymizingKey;
        self.take_failure(operation)?;
        let message = canonical::reset_anonymizing_key_string(&request.time, &request.nonce, &request.wallet_id);
        self.verify_wallet(operation, &request.wallet_id, &message, &request.wallet_signature)?;

        let anonymizing_key = random_bytes(32);
        if let Some(wallet) = self.state.lock().unwrap().wallets.get_mut(&request.wallet_id) {
            wallet.anonymizing_key = anonymizing_key.clone();
        }
        Ok(ResetAnonymizingKeyResponse {
            wallet_id: request.wallet_id.clone(),
            anonymizing_key: encoding::encode(&anonymizing_key),
            anonymizing_hashing_scheme: HashingScheme::HmacSha256.to_string(),
        })
    }

    async fn check_age(&self, request: &CheckAgeRequest) -> Result<CheckAgeResponse, ApiError> {
        let operation = ApiOperation::CheckAge;
        self.take_failure(operation)?;
        let message = canonical::check_age_string(request);
        self.verify_wallet(operation, &request.wallet_id, &message, &request.wallet_signature)?;

        let date_of_birth = chrono::NaiveDate::parse_from_str(&request.date_of_birth, "%Y-%m-%d")
            .map_err(|_| ApiError::new(operation, ApiErrorCode::RequestFailed).with_status(400))?;
        let age = Utc::now().date_naive().years_since(date_of_birth).unwrap_or(0);

        Ok(CheckAgeResponse {
            wallet_id: request.wallet_id.clone(),
            age,
            identity_attributes: [
                ("age_over_18".to_string(), (age >= 18).to_string()),
                ("age_over_21".to_string(), (age >= 21).to_string()),
            ]
            .into_iter()
            .collect(),
        })
    }

    async fn claim(&self, request: &ClaimRequest) -> Result<ClaimResponse, ApiError> {
        let operation = ApiOperation::Claim;
        self.take_failure(operation)?;
        let message = canonical::claim_string(
            &request.time,
            &request.nonce,
            &request.challenge_id,
            &request.wallet_id,
        );
        self.verify_wallet(operation, &request.wallet_id, &message, &request.wallet_signature)?;

        let state = self.state.lock().unwrap();
        let issued = state.challenges.get(&request.challenge_id).ok_or_else(|| {
            ApiError::new(operation, ApiErrorCode::RequestFailed)
                .with_status(404)
                .with_body("unknown challenge")
        })?;
        Ok(ClaimResponse {
            claim: issued.claim.clone(),
            challenge: issued.challenge.clone(),
        })
    }

    async fn accept(&self, request: &AcceptRequest) -> Result<(), ApiError> {
        let operation = ApiOperation::Accept;
        self.take_failure(operation)?;
        let message = canonical::accept_string(request);
        self.verify_wallet(operation, &request.wallet_id, &message, &request.wallet_signature)?;
        self.state.lock().unwrap().accepted.push(request.clone());
        Ok(())
    }

    async fn reject(&self, request: &RejectRequest) -> Result<(), ApiError> {
        let operation = ApiOperation::Reject;
        self.take_failure(operation)?;
        let message = canonical::reject_string(request);
        self.verify_wallet(operation, &request.wallet_id, &message, &request.wallet_signature)?;
        self.state.lock().unwrap().rejected.push(request.clone());
        Ok(())
    }
}
