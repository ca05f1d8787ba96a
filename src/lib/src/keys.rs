//! Key provisioning inside the secure element.
//!
//! Keys are generated (or, for HMAC secrets, imported) into fixed slots and
//! referred to afterwards only through a [`KeyHandle`]. No function here
//! returns private or secret key bytes.

use crate::audit;
use crate::error::SeError;
use crate::oid::{self, ObjectKind, Oid};
use crate::platform::PublicKeyBytes;
use crate::session::Session;
use p256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

/// Algorithm bound to a key slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    Aes,
    EcdsaP256,
    HmacSha256,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Aes => write!(f, "AES"),
            KeyAlgorithm::EcdsaP256 => write!(f, "ECC-P256"),
            KeyAlgorithm::HmacSha256 => write!(f, "HMAC-SHA256"),
        }
    }
}

/// Supported elliptic curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EccCurve {
    NistP256,
}

/// Reference to a key held inside the element.
///
/// Handles are only produced by this module, from slots the element
/// reports as provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHandle {
    oid: Oid,
    algorithm: KeyAlgorithm,
    bits: u16,
}

impl KeyHandle {
    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn bits(&self) -> u16 {
        self.bits
    }

    /// Refuse the handle unless it is bound to `algorithm`.
    pub fn require(&self, algorithm: KeyAlgorithm) -> Result<(), SeError> {
        if self.algorithm != algorithm {
            return Err(SeError::InvalidParameter(format!(
                "{} holds a {} key, {} required",
                self.oid, self.algorithm, algorithm
            )));
        }
        Ok(())
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}@{}", self.algorithm, self.bits, self.oid)
    }
}

/// P-256 public key in uncompressed SEC1 form.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    bytes: PublicKeyBytes,
}

impl PublicKey {
    /// Parse and validate an uncompressed point.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, SeError> {
        let bytes: PublicKeyBytes = bytes.try_into().map_err(|_| {
            SeError::InvalidLength(format!(
                "public key must be 65 bytes (0x04||X||Y), got {}",
                bytes.len()
            ))
        })?;
        if bytes[0] != 0x04 {
            return Err(SeError::InvalidParameter(
                "public key must be uncompressed (0x04 prefix)".into(),
            ));
        }
        VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| {
            SeError::InvalidParameter("public key is not a P-256 curve point".into())
        })?;
        Ok(PublicKey { bytes })
    }

    pub fn from_hex(s: &str) -> Result<Self, SeError> {
        Self::from_sec1_bytes(&hex::decode(s.trim())?)
    }

    pub fn as_bytes(&self) -> &PublicKeyBytes {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, SeError> {
        VerifyingKey::from_sec1_bytes(&self.bytes)
            .map_err(|_| SeError::InvalidParameter("public key is not a P-256 curve point".into()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// Accepted HMAC secret sizes in bytes.
pub const HMAC_KEY_MIN: usize = 16;
pub const HMAC_KEY_MAX: usize = 64;

/// Generate an AES key of 128, 192 or 256 bits at `oid`.
///
/// Any key previously held in the slot is replaced.
pub fn generate_symmetric_key(
    session: &mut Session<'_>,
    oid: Oid,
    bits: u16,
) -> Result<KeyHandle, SeError> {
    oid::expect_kind(oid, ObjectKind::SymmetricKey)?;
    if !matches!(bits, 128 | 192 | 256) {
        return Err(SeError::UnsupportedLength(bits));
    }

    session.element().generate_symmetric_key(oid, bits)?;
    log::info!("Generated AES-{} key at {}", bits, oid);
    audit::log_key_generated(oid, "AES", bits);

    Ok(KeyHandle {
        oid,
        algorithm: KeyAlgorithm::Aes,
        bits,
    })
}

/// Generate an ECC key pair at `oid`; only the public key is returned.
pub fn generate_asymmetric_keypair(
    session: &mut Session<'_>,
    oid: Oid,
    curve: EccCurve,
) -> Result<(KeyHandle, PublicKey), SeError> {
    oid::expect_kind(oid, ObjectKind::AsymmetricKey)?;

    let public = session.element().generate_keypair(oid, curve)?;
    let public = PublicKey::from_sec1_bytes(&public)?;
    log::info!("Generated ECC P-256 key pair at {}", oid);
    audit::log_key_generated(oid, "ECC-P256", 256);

    Ok((
        KeyHandle {
            oid,
            algorithm: KeyAlgorithm::EcdsaP256,
            bits: 256,
        },
        public,
    ))
}

/// Obtain the handle of a key already provisioned at `oid`.
pub fn load_key(session: &mut Session<'_>, oid: Oid) -> Result<KeyHandle, SeError> {
    let spec = oid::lookup(oid)?;
    let allowed = spec.kind.is_key() || oid::is_hmac_slot(oid);
    if !allowed {
        return Err(SeError::InvalidParameter(format!(
            "{} ({}) is not a key slot",
            oid, spec.name
        )));
    }

    let info = session.element().key_info(oid)?;
    Ok(KeyHandle {
        oid,
        algorithm: info.algorithm,
        bits: info.bits,
    })
}

/// Export the public half of an ECC key.
pub fn export_public_key(
    session: &mut Session<'_>,
    handle: &KeyHandle,
) -> Result<PublicKey, SeError> {
    handle.require(KeyAlgorithm::EcdsaP256)?;
    let public = session.element().public_key(handle.oid)?;
    PublicKey::from_sec1_bytes(&public)
}

fn check_hmac_slot(oid: Oid) -> Result<(), SeError> {
    oid::lookup(oid)?;
    if !oid::is_hmac_slot(oid) {
        return Err(SeError::AccessDenied(format!(
            "{} is outside the HMAC key range",
            oid
        )));
    }
    Ok(())
}

/// Provision an HMAC secret into a data slot of the HMAC range.
///
/// The slot becomes unreadable afterwards.
pub fn import_hmac_key(
    session: &mut Session<'_>,
    oid: Oid,
    key: &[u8],
) -> Result<KeyHandle, SeError> {
    check_hmac_slot(oid)?;
    if !(HMAC_KEY_MIN..=HMAC_KEY_MAX).contains(&key.len()) {
        return Err(SeError::InvalidLength(format!(
            "HMAC key must be {}-{} bytes, got {}",
            HMAC_KEY_MIN,
            HMAC_KEY_MAX,
            key.len()
        )));
    }

    session.element().write_secret(oid, key)?;
    log::info!("Imported {}-byte HMAC key at {}", key.len(), oid);

    Ok(KeyHandle {
        oid,
        algorithm: KeyAlgorithm::HmacSha256,
        bits: (key.len() * 8) as u16,
    })
}

/// Generate a 256-bit HMAC secret from the element RNG.
pub fn generate_hmac_key(session: &mut Session<'_>, oid: Oid) -> Result<KeyHandle, SeError> {
    check_hmac_slot(oid)?;

    let mut secret = Zeroizing::new([0u8; 32]);
    session.element().random(secret.as_mut())?;
    session.element().write_secret(oid, secret.as_ref())?;
    audit::log_key_generated(oid, "HMAC-SHA256", 256);

    Ok(KeyHandle {
        oid,
        algorithm: KeyAlgorithm::HmacSha256,
        bits: 256,
    })
}
