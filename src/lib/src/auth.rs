//! Challenge-response device authentication.
//!
//! ```text
//!   verifier                                   prover
//!   issue_challenge()
//!     {nonce, timestamp, expires_in}  ────────►
//!                                              respond(identity key)
//!                                    ◄──────── {nonce, signature, sig_alg}
//!   receive_response()
//!     -> Authenticated | Rejected(reason)
//! ```
//!
//! A nonce is used for exactly one attempt and lives only in the
//! verifier's memory. The state machine is
//! `Idle -> ChallengeIssued -> ResponseReceived -> Authenticated | Rejected`;
//! both terminal states are final for their challenge, and a new attempt
//! starts with a fresh nonce.

use crate::audit;
use crate::crypto::{self, SIG_ALG};
use crate::error::SeError;
use crate::keys::{KeyHandle, PublicKey};
use crate::session::Session;
use crate::time::TimeSource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const NONCE_LEN: usize = 32;
pub const DEFAULT_CHALLENGE_EXPIRY_SECS: u64 = 30;

/// Challenge sent by the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeMessage {
    /// 32 random bytes, hex
    pub nonce: String,
    /// Issue time, Unix seconds
    pub timestamp: u64,
    /// Validity window in seconds
    pub expires_in: u64,
}

/// Response returned by the prover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub nonce: String,
    /// DER ECDSA signature over the raw nonce bytes, hex
    pub signature: String,
    pub sig_alg: String,
}

macro_rules! impl_json {
    ($t:ty) => {
        impl $t {
            pub fn to_json(&self) -> Result<String, SeError> {
                Ok(serde_json::to_string(self)?)
            }

            pub fn from_json(json: &str) -> Result<Self, SeError> {
                Ok(serde_json::from_str(json)?)
            }
        }
    };
}

impl_json!(ChallengeMessage);
impl_json!(ResponseMessage);

fn decode_nonce(nonce_hex: &str) -> Result<[u8; NONCE_LEN], SeError> {
    let bytes = hex::decode(nonce_hex)?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        SeError::Malformed(format!("nonce must be {} bytes, got {}", NONCE_LEN, b.len()))
    })
}

impl ChallengeMessage {
    pub fn nonce_bytes(&self) -> Result<[u8; NONCE_LEN], SeError> {
        decode_nonce(&self.nonce)
    }
}

/// Why a response was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    Expired,
    NonceMismatch,
    BadSignature,
    UnsupportedAlgorithm,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Expired => "expired",
            RejectReason::NonceMismatch => "nonce_mismatch",
            RejectReason::BadSignature => "bad_signature",
            RejectReason::UnsupportedAlgorithm => "unsupported_algorithm",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    ChallengeIssued,
    ResponseReceived,
    Authenticated,
    Rejected(RejectReason),
}

struct Outstanding {
    nonce: [u8; NONCE_LEN],
    issued_at: u64,
}

/// Verifier side of the protocol for one peer.
pub struct Authenticator {
    peer_key: PublicKey,
    clock: Arc<dyn TimeSource>,
    expiry_secs: u64,
    state: AuthState,
    outstanding: Option<Outstanding>,
}

impl Authenticator {
    /// `peer_key` is the prover's known identity public key.
    pub fn new(peer_key: PublicKey, clock: Arc<dyn TimeSource>) -> Self {
        Authenticator {
            peer_key,
            clock,
            expiry_secs: DEFAULT_CHALLENGE_EXPIRY_SECS,
            state: AuthState::Idle,
            outstanding: None,
        }
    }

    pub fn with_expiry(mut self, secs: u64) -> Self {
        self.expiry_secs = secs;
        self
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn expiry_secs(&self) -> u64 {
        self.expiry_secs
    }

    /// Draw a fresh nonce and start an attempt.
    ///
    /// Allowed from `Idle` and from either terminal state.
    pub fn issue_challenge(
        &mut self,
        session: &mut Session<'_>,
    ) -> Result<ChallengeMessage, SeError> {
        if matches!(
            self.state,
            AuthState::ChallengeIssued | AuthState::ResponseReceived
        ) {
            return Err(SeError::InvalidState("a challenge is already outstanding"));
        }

        let issued_at = self.clock.trusted_now()?;
        let random = crypto::random_bytes(session, NONCE_LEN)?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&random);

        self.outstanding = Some(Outstanding { nonce, issued_at });
        self.state = AuthState::ChallengeIssued;
        log::debug!("challenge issued at {}", issued_at);

        Ok(ChallengeMessage {
            nonce: hex::encode(nonce),
            timestamp: issued_at,
            expires_in: self.expiry_secs,
        })
    }

    /// Abandon the outstanding challenge, if any.
    pub fn cancel(&mut self) {
        self.outstanding = None;
        self.state = AuthState::Idle;
    }

    /// Evaluate the prover's response to the outstanding challenge.
    ///
    /// Only valid in `ChallengeIssued`. The nonce is consumed whatever the
    /// outcome.
    pub fn receive_response(
        &mut self,
        response: &ResponseMessage,
    ) -> Result<AuthOutcome, SeError> {
        if self.state != AuthState::ChallengeIssued {
            return Err(SeError::InvalidState("no challenge outstanding"));
        }
        let outstanding = self
            .outstanding
            .take()
            .ok_or(SeError::InvalidState("no challenge outstanding"))?;
        self.state = AuthState::ResponseReceived;

        let outcome = match self.evaluate(&outstanding, response) {
            None => AuthOutcome::Authenticated,
            Some(reason) => AuthOutcome::Rejected(reason),
        };

        let nonce_hex = hex::encode(outstanding.nonce);
        match outcome {
            AuthOutcome::Authenticated => {
                log::info!("peer authenticated");
                audit::log_auth_outcome(&nonce_hex, true, None);
                self.state = AuthState::Authenticated;
            }
            AuthOutcome::Rejected(reason) => {
                log::warn!("peer authentication rejected: {}", reason);
                audit::log_auth_outcome(&nonce_hex, false, Some(reason.as_str()));
                self.state = AuthState::Rejected(reason);
            }
        }
        Ok(outcome)
    }

    fn evaluate(&self, outstanding: &Outstanding, response: &ResponseMessage) -> Option<RejectReason> {
        match decode_nonce(&response.nonce) {
            Ok(nonce) if nonce == outstanding.nonce => {}
            _ => return Some(RejectReason::NonceMismatch),
        }

        if response.sig_alg != SIG_ALG {
            return Some(RejectReason::UnsupportedAlgorithm);
        }

        // An unreadable clock, or one that moved backwards, cannot prove freshness.
        let fresh = match self.clock.trusted_now() {
            Ok(now) if now >= outstanding.issued_at => {
                now - outstanding.issued_at <= self.expiry_secs
            }
            _ => false,
        };
        if !fresh {
            return Some(RejectReason::Expired);
        }

        let signature = match hex::decode(&response.signature) {
            Ok(sig) => sig,
            Err(_) => return Some(RejectReason::BadSignature),
        };
        match crypto::verify_signature(&self.peer_key, &outstanding.nonce, &signature) {
            Ok(()) => None,
            Err(_) => Some(RejectReason::BadSignature),
        }
    }
}

/// Prover side: sign the challenge nonce with the identity key.
pub fn respond(
    session: &mut Session<'_>,
    identity_key: &KeyHandle,
    challenge: &ChallengeMessage,
) -> Result<ResponseMessage, SeError> {
    let nonce = challenge.nonce_bytes()?;
    let signature = crypto::sign_data(session, identity_key, &nonce)?;
    Ok(ResponseMessage {
        nonce: challenge.nonce.clone(),
        signature: hex::encode(signature),
        sig_alg: SIG_ALG.to_string(),
    })
}
