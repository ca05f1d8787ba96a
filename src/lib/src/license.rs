//! License verification at startup.
//!
//! A license is an ECDSA P-256 signature by the fleet issuer over the
//! device's hardware UID, optionally followed by license metadata. The
//! issuer public key is fixed at build time (`SECLIENT_ISSUER_KEY`), so a
//! license can only be minted by whoever holds the issuer private key.
//!
//! Nothing here is cached across restarts: [`LicenseVerifier::check`] runs
//! once per process start, and its result gates the client surface.

use crate::audit;
use crate::config::LicenseConfig;
use crate::crypto;
use crate::error::SeError;
use crate::keys::PublicKey;
use crate::oid::{DEVICE_UID, DEVICE_UID_LEN};
use crate::session::Session;
use crate::store;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;

/// Issuer public key baked in at build time (uncompressed P-256, hex).
pub const ISSUER_KEY_HEX: &str = match option_env!("SECLIENT_ISSUER_KEY") {
    Some(key) => key,
    None => "0430f56de21be5cae96a5e1a0a9cd87d6865006b31e0f31dd9267ff839974185ee99c2148c9cc3648c734573edc7ebd29c7b5ae212aa4795258ad9b8499fd01c06",
};

pub fn embedded_issuer_key() -> Result<PublicKey, SeError> {
    PublicKey::from_hex(ISSUER_KEY_HEX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LicenseStatus {
    Valid,
    Invalid,
    /// No license key configured, or no UID in the element
    NotProvisioned,
}

impl LicenseStatus {
    pub fn is_valid(&self) -> bool {
        *self == LicenseStatus::Valid
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Valid => "valid",
            LicenseStatus::Invalid => "invalid",
            LicenseStatus::NotProvisioned => "not_provisioned",
        }
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device UID, issuer signature and signed metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseRecord {
    pub device_uid: Vec<u8>,
    /// DER ECDSA signature
    pub signature: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl LicenseRecord {
    /// Build a record from the Base64 license key as distributed to devices.
    pub fn from_license_key(
        device_uid: &[u8],
        license_key_b64: &str,
        metadata: Option<&str>,
    ) -> Result<Self, SeError> {
        Ok(LicenseRecord {
            device_uid: device_uid.to_vec(),
            signature: STANDARD.decode(license_key_b64.trim())?,
            metadata: metadata.map(|m| m.as_bytes().to_vec()).unwrap_or_default(),
        })
    }

    /// Bytes covered by the issuer signature: `uid || metadata`.
    pub fn signed_message(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(self.device_uid.len() + self.metadata.len());
        msg.extend_from_slice(&self.device_uid);
        msg.extend_from_slice(&self.metadata);
        msg
    }

    pub fn verify(&self, issuer_key: &PublicKey) -> LicenseStatus {
        if self.device_uid.is_empty() || self.signature.is_empty() {
            return LicenseStatus::NotProvisioned;
        }
        match crypto::verify_signature(issuer_key, &self.signed_message(), &self.signature) {
            Ok(()) => LicenseStatus::Valid,
            Err(_) => LicenseStatus::Invalid,
        }
    }
}

/// Verify `signature` over `uid` (no metadata) against `issuer_key`.
pub fn verify_license(uid: &[u8], signature: &[u8], issuer_key: &PublicKey) -> LicenseStatus {
    LicenseRecord {
        device_uid: uid.to_vec(),
        signature: signature.to_vec(),
        metadata: Vec::new(),
    }
    .verify(issuer_key)
}

/// Startup license check against the element's UID.
pub struct LicenseVerifier {
    issuer_key: PublicKey,
}

impl LicenseVerifier {
    pub fn new(issuer_key: PublicKey) -> Self {
        LicenseVerifier { issuer_key }
    }

    /// Verifier using the build-time issuer key.
    pub fn embedded() -> Result<Self, SeError> {
        Ok(Self::new(embedded_issuer_key()?))
    }

    pub fn issuer_key(&self) -> &PublicKey {
        &self.issuer_key
    }

    /// Read the UID and decide the license status.
    ///
    /// Element faults are returned as errors, everything else is a status.
    pub fn check(
        &self,
        session: &mut Session<'_>,
        config: &LicenseConfig,
    ) -> Result<LicenseStatus, SeError> {
        let license_key = match config.license_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key,
            _ => {
                log::warn!("no license key configured");
                audit::log_license_result(None, LicenseStatus::NotProvisioned.as_str());
                return Ok(LicenseStatus::NotProvisioned);
            }
        };

        let uid = store::read(session, DEVICE_UID, DEVICE_UID_LEN)?;
        if uid.is_empty() {
            log::warn!("device UID object is empty");
            audit::log_license_result(None, LicenseStatus::NotProvisioned.as_str());
            return Ok(LicenseStatus::NotProvisioned);
        }
        let uid_hex = hex::encode_upper(&uid);

        let status = self.evaluate(&uid, license_key, config);
        log::info!("license status for device {}: {}", audit::redact_uid(&uid_hex), status);
        audit::log_license_result(Some(&uid_hex), status.as_str());
        Ok(status)
    }

    fn evaluate(&self, uid: &[u8], license_key: &str, config: &LicenseConfig) -> LicenseStatus {
        if let Some(expected) = config.expected_uid.as_deref() {
            match hex::decode(expected.trim()) {
                Ok(expected) if expected == uid => {}
                Ok(_) => {
                    log::warn!("device UID does not match the licensed UID");
                    return LicenseStatus::Invalid;
                }
                Err(e) => {
                    log::warn!("configured device UID is not hex: {}", e);
                    return LicenseStatus::Invalid;
                }
            }
        }

        match LicenseRecord::from_license_key(uid, license_key, config.metadata.as_deref()) {
            Ok(record) => record.verify(&self.issuer_key),
            Err(e) => {
                log::warn!("license key cannot be decoded: {}", e);
                LicenseStatus::Invalid
            }
        }
    }
}
