//! Identity challenges, claims and the per-challenge state machine.
//!
//! # State Transitions
//!
//! ```text
//! Unclaimed
//!     ↓ (on_claimed)
//! Claimed ──→ Accepted
//!     │  └──→ Rejected
//!     ↓
//! Expired
//! ```
//!
//! `Accepted`, `Rejected` and `Expired` are terminal.

use chrono::{DateTime, Utc};
use idwallet_core::is_expired;
use idwallet_crypto::{signing, EncryptingScheme, SigningScheme};
use serde::{Deserialize, Serialize};

use crate::canonical;
use crate::encoding;
use crate::error::{IdentityError, IdentityResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequesterType {
    Application,
    Wallet,
}

impl RequesterType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequesterType::Application => "application",
            RequesterType::Wallet => "wallet",
        }
    }
}

/// A disclosure request as issued by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    /// Requested attribute names. This order is authoritative and is never re-sorted.
    pub identity_attributes: Vec<String>,
    pub identity_encrypting_scheme: String,
    pub expires_at: String,
    /// Base64 authority signature over the challenge fields
    pub issuer_signature: String,
}

impl Challenge {
    pub fn encrypting_scheme(&self) -> IdentityResult<EncryptingScheme> {
        Ok(self.identity_encrypting_scheme.parse::<EncryptingScheme>()?)
    }

    pub fn signing_string(&self) -> String {
        canonical::challenge_issuer_string(self)
    }

    pub fn verify_issuer(&self, scheme: SigningScheme, authority_public_key: &[u8]) -> bool {
        verify_base64_signature(
            scheme,
            authority_public_key,
            &self.signing_string(),
            &self.issuer_signature,
        )
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> IdentityResult<bool> {
        Ok(is_expired(&self.expires_at, now)?)
    }
}

/// Who is asking, as attested by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub requester_id: String,
    pub requester_name: String,
    pub requester_type: RequesterType,
    /// Base64 SPKI of the requester's encryption key
    pub requester_public_key: String,
    pub time: String,
    pub issuer_signature: String,
}

impl Claim {
    pub fn signing_string(&self, challenge_id: &str) -> String {
        canonical::claim_issuer_string(challenge_id, self)
    }

    pub fn verify_issuer(
        &self,
        challenge_id: &str,
        scheme: SigningScheme,
        authority_public_key: &[u8],
    ) -> bool {
        verify_base64_signature(
            scheme,
            authority_public_key,
            &self.signing_string(challenge_id),
            &self.issuer_signature,
        )
    }
}

fn verify_base64_signature(
    scheme: SigningScheme,
    public_key: &[u8],
    message: &str,
    signature: &str,
) -> bool {
    match encoding::decode(signature) {
        Ok(signature) => signing::verify(scheme, public_key, message.as_bytes(), &signature),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Unclaimed,
    Claimed,
    Accepted,
    Rejected,
    Expired,
}

impl ChallengeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChallengeState::Accepted | ChallengeState::Rejected | ChallengeState::Expired
        )
    }
}

/// One challenge as seen by this wallet.
///
/// The claim and challenge are only stored once their issuer signatures
/// have been verified.
#[derive(Debug, Clone)]
pub struct ChallengeSession {
    challenge_id: String,
    state: ChallengeState,
    claimed: Option<(Claim, Challenge)>,
}

impl ChallengeSession {
    pub fn new(challenge_id: impl Into<String>) -> Self {
        Self {
            challenge_id: challenge_id.into(),
            state: ChallengeState::Unclaimed,
            claimed: None,
        }
    }

    pub fn challenge_id(&self) -> &str {
        &self.challenge_id
    }

    pub fn state(&self) -> ChallengeState {
        self.state
    }

    pub fn claim(&self) -> Option<&Claim> {
        self.claimed.as_ref().map(|(claim, _)| claim)
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        self.claimed.as_ref().map(|(_, challenge)| challenge)
    }

    /// Verified claim and challenge, only while `Claimed`.
    pub fn claimed(&self) -> IdentityResult<(&Claim, &Challenge)> {
        match (&self.state, &self.claimed) {
            (ChallengeState::Claimed, Some((claim, challenge))) => Ok((claim, challenge)),
            _ => Err(IdentityError::InvalidTransition(format!(
                "challenge {} is {:?}, not Claimed",
                self.challenge_id, self.state
            ))),
        }
    }

    /// Transition: Unclaimed → Claimed
    pub fn on_claimed(&mut self, claim: Claim, challenge: Challenge) -> IdentityResult<()> {
        match self.state {
            ChallengeState::Unclaimed => {
                self.claimed = Some((claim, challenge));
                self.state = ChallengeState::Claimed;
                Ok(())
            }
            _ => Err(self.invalid("claim")),
        }
    }

    /// Transition: Claimed → Accepted
    pub fn on_accepted(&mut self) -> IdentityResult<()> {
        self.finish_claimed(ChallengeState::Accepted, "accept")
    }

    /// Transition: Claimed → Rejected
    pub fn on_rejected(&mut self) -> IdentityResult<()> {
        self.finish_claimed(ChallengeState::Rejected, "reject")
    }

    /// Transition: Unclaimed | Claimed → Expired
    pub fn on_expired(&mut self) -> IdentityResult<()> {
        if self.state.is_terminal() {
            return Err(self.invalid("expire"));
        }
        self.state = ChallengeState::Expired;
        Ok(())
    }

    fn finish_claimed(&mut self, next: ChallengeState, action: &str) -> IdentityResult<()> {
        match self.state {
            ChallengeState::Claimed => {
                self.state = next;
                Ok(())
            }
            _ => Err(self.invalid(action)),
        }
    }

    fn invalid(&self, action: &str) -> IdentityError {
        IdentityError::InvalidTransition(format!(
            "cannot {action} challenge {} in state {:?}",
            self.challenge_id, self.state
        ))
    }
}
