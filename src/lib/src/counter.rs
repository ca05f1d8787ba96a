//! Monotonic counters and receiver-side replay protection.
//!
//! Sender: every protected message consumes one increment of a hardware
//! counter and carries the new value under its signature. Receiver: a
//! [`ReplayGuard`] remembers the last value accepted per peer and refuses
//! anything not strictly greater.
//!
//! The guard checks the counter before verifying the signature, so replays
//! are dropped cheaply, but only commits the value after the signature has
//! verified. A forged message with a huge counter therefore cannot advance
//! the window and lock out the genuine sender.

use crate::audit;
use crate::crypto::{self, SIG_ALG};
use crate::error::SeError;
use crate::keys::{KeyHandle, PublicKey};
use crate::oid::{self, ObjectKind, Oid};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub fn read_counter(session: &mut Session<'_>, oid: Oid) -> Result<u32, SeError> {
    oid::expect_kind(oid, ObjectKind::Counter)?;
    session.element().counter_read(oid)
}

/// Add one to the counter and return the new value.
pub fn increment_counter(session: &mut Session<'_>, oid: Oid) -> Result<u32, SeError> {
    increment_counter_by(session, oid, 1)
}

/// Add `step` (at least 1) to the counter and return the new value.
///
/// The read-modify-write runs as one element command inside the session.
/// An increment past `u32::MAX` is refused and leaves the counter unchanged.
pub fn increment_counter_by(
    session: &mut Session<'_>,
    oid: Oid,
    step: u32,
) -> Result<u32, SeError> {
    if step == 0 {
        return Err(SeError::InvalidParameter(
            "counter step must be at least 1".into(),
        ));
    }
    oid::expect_kind(oid, ObjectKind::Counter)?;

    match session.element().counter_increment(oid, step) {
        Ok(value) => {
            log::debug!("counter {} advanced by {} to {}", oid, step, value);
            Ok(value)
        }
        Err(SeError::CounterOverflow(oid)) => {
            audit::log_counter_overflow(oid);
            Err(SeError::CounterOverflow(oid))
        }
        Err(e) => Err(e),
    }
}

/// Message bound to a counter value by a device signature.
///
/// Wire form:
///
/// ```json
/// {"data": "{\"temp\":25.3}", "counter": 42, "sig": "3045...", "sig_alg": "ECDSA-P256-SHA256"}
/// ```
///
/// The signature covers `counter` as 4 big-endian bytes followed by the
/// UTF-8 bytes of `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedMessage {
    pub data: String,
    pub counter: u32,
    /// DER signature, hex
    pub sig: String,
    pub sig_alg: String,
}

impl CountedMessage {
    pub fn signed_bytes(counter: u32, data: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + data.len());
        out.extend_from_slice(&counter.to_be_bytes());
        out.extend_from_slice(data.as_bytes());
        out
    }

    pub fn to_json(&self) -> Result<String, SeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SeError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Consume one counter increment and sign `data` together with it.
pub fn seal_counted(
    session: &mut Session<'_>,
    counter_oid: Oid,
    signing_key: &KeyHandle,
    data: &str,
) -> Result<CountedMessage, SeError> {
    let counter = increment_counter(session, counter_oid)?;
    let sig = crypto::sign_data(
        session,
        signing_key,
        &CountedMessage::signed_bytes(counter, data),
    )?;
    Ok(CountedMessage {
        data: data.to_string(),
        counter,
        sig: hex::encode(sig),
        sig_alg: SIG_ALG.to_string(),
    })
}

/// Receiver-side record of the last accepted counter per peer.
///
/// Serializable so the window survives a receiver restart; a guard that
/// forgets its state accepts every old message once more.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayGuard {
    last_accepted: BTreeMap<String, u32>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_accepted(&self, peer: &str) -> Option<u32> {
        self.last_accepted.get(peer).copied()
    }

    /// Refuse `value` if it is not strictly greater than the last value
    /// accepted from `peer`. Does not record anything.
    pub fn check(&self, peer: &str, value: u32) -> Result<(), SeError> {
        match self.last_accepted(peer) {
            Some(last) if value <= last => {
                log::warn!(
                    "replay from {}: counter {} <= last accepted {}",
                    peer,
                    value,
                    last
                );
                audit::log_replay_rejected(peer, value, last);
                Err(SeError::Replay {
                    received: value,
                    last_accepted: last,
                })
            }
            _ => Ok(()),
        }
    }

    /// Record `value` as accepted. Never moves the window backwards.
    pub fn commit(&mut self, peer: &str, value: u32) {
        let entry = self.last_accepted.entry(peer.to_string()).or_insert(value);
        if value > *entry {
            *entry = value;
        }
    }

    /// Check, verify the device signature, then commit.
    ///
    /// Returns the authenticated payload.
    pub fn verify_counted(
        &mut self,
        peer: &str,
        message: &CountedMessage,
        sender_key: &PublicKey,
    ) -> Result<String, SeError> {
        self.check(peer, message.counter)?;

        if message.sig_alg != SIG_ALG {
            return Err(SeError::VerificationFailed);
        }
        let sig = hex::decode(&message.sig).map_err(|_| SeError::VerificationFailed)?;
        crypto::verify_signature(
            sender_key,
            &CountedMessage::signed_bytes(message.counter, &message.data),
            &sig,
        )?;

        self.commit(peer, message.counter);
        Ok(message.data.clone())
    }

    pub fn to_json(&self) -> Result<String, SeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SeError> {
        Ok(serde_json::from_str(json)?)
    }
}
