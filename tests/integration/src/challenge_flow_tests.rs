//! Challenge Flow - claim, accept and reject end to end
//!
//! # Test Scenarios
//!
//! 1. **Accept with partial disclosure**: requester decrypts the payload and
//!    recomputes the identity hash in challenge order
//! 2. **Every encrypting scheme**: X25519, P-256 and P-384 requesters
//! 3. **Reject**: identity hash covers the attributes the wallet holds, is
//!    stable across rejections and skips the derived `anonymous_id`
//! 4. **Untrusted challenge**: a challenge altered after signing is refused
//! 5. **Expired challenge**: no disclosure after expiry
//! 6. **Terminal states**: nothing is sent twice

use std::collections::BTreeMap;

use chrono::Duration;
use idwallet_crypto::{hashing, EncryptingScheme, HashingScheme, SigningScheme};
use idwallet_identity::encoding;
use idwallet_identity::secure_store::ANONYMIZING_KEY_ENTRY;
use idwallet_identity::{
    build_rejection_hash, compute_commitment, compute_identity_hash, unique_requested,
    ApiErrorCode, ChallengeState, IdentityError, IdentityProtocol, InMemoryEnclave, SecureEnclave,
    WalletSession, ANONYMOUS_ID_ATTRIBUTE,
};

use crate::test_utils::{init_tracing, remove_store, temp_store, MockAuthority, TestRequester};

fn alice() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("first_name".to_string(), "Alice".to_string()),
        ("last_name".to_string(), "Liddell".to_string()),
        ("date_of_birth".to_string(), "2000-01-01".to_string()),
    ])
}

async fn registered(
    authority: &MockAuthority,
    signing_scheme: SigningScheme,
) -> (IdentityProtocol<MockAuthority>, WalletSession<InMemoryEnclave>) {
    init_tracing();
    let protocol = IdentityProtocol::new(authority.clone(), authority.settings(signing_scheme));
    let session = protocol.register(temp_store(), alice()).await.unwrap();
    (protocol, session)
}

/// Recompute the identity hash from a decrypted payload, in challenge order.
fn recompute_identity_hash(
    challenge_id: &str,
    requested: &[String],
    payload: &serde_json::Value,
) -> Vec<u8> {
    let commitments: Vec<Vec<u8>> = requested
        .iter()
        .filter_map(|name| {
            let attribute = &payload["attributes"][name.as_str()];
            if attribute.is_null() {
                return None;
            }
            Some(
                compute_commitment(
                    HashingScheme::HmacSha256,
                    attribute["salt"].as_str().unwrap(),
                    attribute["value"].as_str().unwrap(),
                )
                .unwrap(),
            )
        })
        .collect();
    compute_identity_hash(HashingScheme::HmacSha256, challenge_id, &commitments).unwrap()
}

#[tokio::test]
async fn test_accept_with_partial_disclosure() {
    let authority = MockAuthority::new();
    let (protocol, mut session) = registered(&authority, SigningScheme::EdDsaEd25519).await;
    let requester = TestRequester::new("app_pub", EncryptingScheme::EcdhX25519HkdfSha256Aes256Gcm);
    let requested = ["last_name", ANONYMOUS_ID_ATTRIBUTE, "first_name", "nationality"];
    let challenge_id = authority.issue_challenge(&requester, &requested, Duration::minutes(5));

    let mut state = protocol.claim(&session, &challenge_id).await.unwrap();
    assert_eq!(state.state(), ChallengeState::Claimed);
    assert_eq!(state.claim().unwrap().requester_id, "app_pub");

    protocol.accept(&mut session, &mut state).await.unwrap();
    assert_eq!(state.state(), ChallengeState::Accepted);

    let accepted = authority.accepted();
    assert_eq!(accepted.len(), 1);
    let request = &accepted[0];
    let payload = requester.open(request);

    assert!(payload["attributes"]["nationality"].is_null());
    let wallet = session.wallet();
    assert_eq!(payload["attributes"]["first_name"]["value"], "Alice");
    assert_eq!(
        payload["attributes"]["first_name"]["salt"],
        wallet.attribute("first_name").unwrap().salt.as_str()
    );
    assert!(payload["attributes"].get("date_of_birth").is_none());

    let registered = authority.wallet(&wallet.id).unwrap();
    let expected_anonymous_id = encoding::encode(
        &hashing::hash(HashingScheme::HmacSha256, &registered.anonymizing_key, b"app_pub").unwrap(),
    );
    assert_eq!(payload["attributes"][ANONYMOUS_ID_ATTRIBUTE]["value"], expected_anonymous_id.as_str());
    assert_eq!(
        request.anonymizing_key.as_deref(),
        Some(encoding::encode(&registered.anonymizing_key).as_str())
    );

    let challenge = authority.challenge(&challenge_id);
    let identity_hash = recompute_identity_hash(&challenge_id, &challenge.identity_attributes, &payload);
    assert_eq!(encoding::encode(&identity_hash), request.identity_hash);

    let salted: Vec<&String> = request.identity_attribute_hashing_salts.keys().collect();
    assert_eq!(salted, vec![ANONYMOUS_ID_ATTRIBUTE, "first_name", "last_name"]);

    remove_store(session.store()).await;
}

#[tokio::test]
async fn test_accept_with_every_encrypting_scheme() {
    let authority = MockAuthority::new();
    let (protocol, mut session) = registered(&authority, SigningScheme::EcdsaP256Sha256).await;

    for scheme in EncryptingScheme::ALL {
        let requester = TestRequester::new(&format!("app_{scheme}"), scheme);
        let challenge_id = authority.issue_challenge(&requester, &["first_name"], Duration::minutes(5));

        let mut state = protocol.claim(&session, &challenge_id).await.unwrap();
        protocol.accept(&mut session, &mut state).await.unwrap();

        let request = authority.accepted().pop().unwrap();
        assert_eq!(request.challenge_id, challenge_id);
        assert!(request.anonymizing_key.is_none());
        let payload = requester.open(&request);
        assert_eq!(payload["attributes"]["first_name"]["value"], "Alice");
    }

    assert_eq!(session.wallet().usage.challenges_accepted, 3);
    remove_store(session.store()).await;
}

#[tokio::test]
async fn test_accept_uses_fresh_ephemeral_keys() {
    let authority = MockAuthority::new();
    let (protocol, mut session) = registered(&authority, SigningScheme::EdDsaEd25519).await;
    let requester = TestRequester::new("app_repeat", EncryptingScheme::EcdhP384HkdfSha384Aes256Gcm);

    for _ in 0..2 {
        let challenge_id = authority.issue_challenge(&requester, &["first_name"], Duration::minutes(5));
        let mut state = protocol.claim(&session, &challenge_id).await.unwrap();
        protocol.accept(&mut session, &mut state).await.unwrap();
    }

    let accepted = authority.accepted();
    assert_ne!(
        accepted[0].identity_encrypting_wallet_key,
        accepted[1].identity_encrypting_wallet_key
    );
    assert_ne!(accepted[0].identity_hash, accepted[1].identity_hash);
    remove_store(session.store()).await;
}

#[tokio::test]
async fn test_reject_hashes_held_attributes() {
    let authority = MockAuthority::new();
    let (protocol, mut session) = registered(&authority, SigningScheme::EcdsaP384Sha384).await;
    let requester = TestRequester::new("app_bar", EncryptingScheme::EcdhP256HkdfSha256Aes256Gcm);
    let challenge_id =
        authority.issue_challenge(&requester, &["last_name", "email", "first_name"], Duration::minutes(5));

    let mut state = protocol.claim(&session, &challenge_id).await.unwrap();
    protocol.reject(&mut session, &mut state).await.unwrap();
    assert_eq!(state.state(), ChallengeState::Rejected);
    assert!(authority.accepted().is_empty());

    let rejected = authority.rejected();
    assert_eq!(rejected.len(), 1);

    let wallet = session.wallet();
    let last_name = wallet.attribute("last_name").unwrap();
    let first_name = wallet.attribute("first_name").unwrap();
    let commitments = vec![
        compute_commitment(HashingScheme::HmacSha256, &last_name.salt, &last_name.value).unwrap(),
        compute_commitment(HashingScheme::HmacSha256, &first_name.salt, &first_name.value).unwrap(),
    ];
    let expected = compute_identity_hash(HashingScheme::HmacSha256, &challenge_id, &commitments).unwrap();
    assert_eq!(rejected[0].identity_hash, encoding::encode(&expected));

    let store = session.into_store();
    let reopened = WalletSession::open(store).await.unwrap();
    assert_eq!(reopened.wallet().usage.challenges_rejected, 1);
    assert!(reopened.wallet().usage.last_used_at.is_some());
    remove_store(reopened.store()).await;
}

/// Hash a requester can recompute from the wallet's held attributes and salts.
fn held_identity_hash(
    wallet: &idwallet_identity::Wallet,
    challenge_id: &str,
    requested: &[String],
) -> Vec<u8> {
    let commitments: Vec<Vec<u8>> = unique_requested(requested)
        .into_iter()
        .filter_map(|name| wallet.attribute(name))
        .map(|attribute| {
            compute_commitment(HashingScheme::HmacSha256, &attribute.salt, &attribute.value).unwrap()
        })
        .collect();
    compute_identity_hash(HashingScheme::HmacSha256, challenge_id, &commitments).unwrap()
}

#[tokio::test]
async fn test_reject_hash_is_recomputable_with_anonymous_id() {
    let authority = MockAuthority::new();
    let (protocol, mut session) = registered(&authority, SigningScheme::EdDsaEd25519).await;
    let requester = TestRequester::new("app_anon", EncryptingScheme::EcdhX25519HkdfSha256Aes256Gcm);
    let requested = ["first_name", ANONYMOUS_ID_ATTRIBUTE, "first_name", ANONYMOUS_ID_ATTRIBUTE];

    let challenge_id = authority.issue_challenge(&requester, &requested, Duration::minutes(5));

    // The authority lets the same challenge be claimed and rejected again.
    for _ in 0..2 {
        let mut state = protocol.claim(&session, &challenge_id).await.unwrap();
        protocol.reject(&mut session, &mut state).await.unwrap();
        assert_eq!(state.state(), ChallengeState::Rejected);
    }

    let rejected = authority.rejected();
    assert_eq!(rejected.len(), 2);
    assert_eq!(rejected[0].identity_hash, rejected[1].identity_hash);
    assert_ne!(rejected[0].nonce, rejected[1].nonce);

    let wallet = session.wallet();
    let challenge = authority.challenge(&challenge_id);
    let expected = held_identity_hash(wallet, &challenge_id, &challenge.identity_attributes);
    assert_eq!(rejected[0].identity_hash, encoding::encode(&expected));

    // Only first_name is held, so it is the sole commitment.
    let first_name_only = held_identity_hash(wallet, &challenge_id, &["first_name".to_string()]);
    assert_eq!(expected, first_name_only);
    assert_eq!(
        build_rejection_hash(wallet, &challenge_id, &challenge.identity_attributes).unwrap(),
        expected
    );
    remove_store(session.store()).await;
}

#[tokio::test]
async fn test_reject_does_not_read_anonymizing_key() {
    let authority = MockAuthority::new();
    let (protocol, mut session) = registered(&authority, SigningScheme::EdDsaEd25519).await;
    let requester = TestRequester::new("app_anon", EncryptingScheme::EcdhP256HkdfSha256Aes256Gcm);
    let challenge_id =
        authority.issue_challenge(&requester, &[ANONYMOUS_ID_ATTRIBUTE, "last_name"], Duration::minutes(5));
    let mut state = protocol.claim(&session, &challenge_id).await.unwrap();

    session
        .store()
        .enclave()
        .delete(ANONYMIZING_KEY_ENTRY)
        .await
        .unwrap();
    protocol.reject(&mut session, &mut state).await.unwrap();
    assert_eq!(state.state(), ChallengeState::Rejected);

    let wallet = session.wallet();
    let expected = held_identity_hash(wallet, &challenge_id, &["last_name".to_string()]);
    assert_eq!(authority.rejected()[0].identity_hash, encoding::encode(&expected));
    remove_store(session.store()).await;
}

#[tokio::test]
async fn test_accept_with_repeated_attributes_is_recomputable() {
    let authority = MockAuthority::new();
    let (protocol, mut session) = registered(&authority, SigningScheme::EdDsaEd25519).await;
    let requester = TestRequester::new("app_dup", EncryptingScheme::EcdhX25519HkdfSha256Aes256Gcm);
    let requested = [ANONYMOUS_ID_ATTRIBUTE, "first_name", ANONYMOUS_ID_ATTRIBUTE];
    let challenge_id = authority.issue_challenge(&requester, &requested, Duration::minutes(5));

    let mut state = protocol.claim(&session, &challenge_id).await.unwrap();
    protocol.accept(&mut session, &mut state).await.unwrap();

    let request = authority.accepted().pop().unwrap();
    let payload = requester.open(&request);
    let challenge = authority.challenge(&challenge_id);
    let requested: Vec<String> = unique_requested(&challenge.identity_attributes)
        .into_iter()
        .map(str::to_string)
        .collect();
    let identity_hash = recompute_identity_hash(&challenge_id, &requested, &payload);
    assert_eq!(encoding::encode(&identity_hash), request.identity_hash);
    assert_eq!(
        payload["attributes"][ANONYMOUS_ID_ATTRIBUTE]["salt"],
        request.identity_attribute_hashing_salts[ANONYMOUS_ID_ATTRIBUTE].as_str()
    );
    remove_store(session.store()).await;
}

#[tokio::test]
async fn test_tampered_challenge_is_untrusted() {
    let authority = MockAuthority::new();
    let (protocol, session) = registered(&authority, SigningScheme::EdDsaEd25519).await;
    let requester = TestRequester::new("app_evil", EncryptingScheme::EcdhX25519HkdfSha256Aes256Gcm);
    let challenge_id = authority.issue_challenge(&requester, &["first_name"], Duration::minutes(5));
    authority.tamper_challenge(&challenge_id, "date_of_birth");

    let result = protocol.claim(&session, &challenge_id).await;
    match result {
        Err(IdentityError::UntrustedChallenge { challenge_id: id, .. }) => assert_eq!(id, challenge_id),
        other => panic!("expected untrusted challenge, got {other:?}"),
    }
    assert!(authority.accepted().is_empty());
    remove_store(session.store()).await;
}

#[tokio::test]
async fn test_challenge_from_other_authority_is_untrusted() {
    let authority = MockAuthority::new();
    let impostor = MockAuthority::new();
    let (_, session) = registered(&authority, SigningScheme::EdDsaEd25519).await;
    let requester = TestRequester::new("app_x", EncryptingScheme::EcdhX25519HkdfSha256Aes256Gcm);

    // Wallet trusts `impostor`, but the challenge is signed by `authority`.
    let protocol = IdentityProtocol::new(authority.clone(), impostor.settings(SigningScheme::EdDsaEd25519));
    let challenge_id = authority.issue_challenge(&requester, &["first_name"], Duration::minutes(5));
    assert!(matches!(
        protocol.claim(&session, &challenge_id).await,
        Err(IdentityError::UntrustedChallenge { .. })
    ));
    remove_store(session.store()).await;
}

#[tokio::test]
async fn test_expired_challenge_is_refused() {
    let authority = MockAuthority::new();
    let (protocol, session) = registered(&authority, SigningScheme::EdDsaEd25519).await;
    let requester = TestRequester::new("app_late", EncryptingScheme::EcdhX25519HkdfSha256Aes256Gcm);
    let challenge_id = authority.issue_challenge(&requester, &["first_name"], Duration::seconds(-5));

    assert!(matches!(
        protocol.claim(&session, &challenge_id).await,
        Err(IdentityError::ChallengeExpired { .. })
    ));
    assert!(authority.accepted().is_empty());
    remove_store(session.store()).await;
}

#[tokio::test]
async fn test_terminal_state_blocks_second_submission() {
    let authority = MockAuthority::new();
    let (protocol, mut session) = registered(&authority, SigningScheme::EdDsaEd25519).await;
    let requester = TestRequester::new("app_twice", EncryptingScheme::EcdhX25519HkdfSha256Aes256Gcm);
    let challenge_id = authority.issue_challenge(&requester, &["first_name"], Duration::minutes(5));

    let mut state = protocol.claim(&session, &challenge_id).await.unwrap();
    protocol.accept(&mut session, &mut state).await.unwrap();

    assert!(matches!(
        protocol.accept(&mut session, &mut state).await,
        Err(IdentityError::InvalidTransition(_))
    ));
    assert!(matches!(
        protocol.reject(&mut session, &mut state).await,
        Err(IdentityError::InvalidTransition(_))
    ));
    assert_eq!(authority.accepted().len(), 1);
    assert!(authority.rejected().is_empty());
    remove_store(session.store()).await;
}

#[tokio::test]
async fn test_failed_accept_keeps_challenge_claimed() {
    let authority = MockAuthority::new();
    let (protocol, mut session) = registered(&authority, SigningScheme::EdDsaEd25519).await;
    let requester = TestRequester::new("app_flaky", EncryptingScheme::EcdhX25519HkdfSha256Aes256Gcm);
    let challenge_id = authority.issue_challenge(&requester, &["first_name"], Duration::minutes(5));

    let mut state = protocol.claim(&session, &challenge_id).await.unwrap();
    authority.fail_next(ApiErrorCode::RequestFailed, 503);
    match protocol.accept(&mut session, &mut state).await {
        Err(IdentityError::Api(err)) => {
            assert_eq!(err.code, ApiErrorCode::RequestFailed);
            assert_eq!(err.status, Some(503));
        }
        other => panic!("expected API error, got {other:?}"),
    }
    assert_eq!(state.state(), ChallengeState::Claimed);
    assert_eq!(session.wallet().usage.challenges_accepted, 0);

    protocol.accept(&mut session, &mut state).await.unwrap();
    assert_eq!(state.state(), ChallengeState::Accepted);
    remove_store(session.store()).await;
}
