/// Hardware boundary: the opaque secure element
///
/// Everything above this module talks to the element only through
/// [`SecureElement`]. Key material is generated and used inside the element;
/// only public keys, MACs, ciphertexts and signatures come back out.
///
/// # Architecture
///
/// ```text
/// ┌──────────────────────────────┐
/// │ auth / channel / counter /   │
/// │ license / client             │
/// └──────────────┬───────────────┘
///                ▼
/// ┌──────────────────────────────┐
/// │ keys / crypto / store        │  validate OIDs, lengths, kinds
/// └──────────────┬───────────────┘
///                ▼
/// ┌──────────────────────────────┐
/// │ SessionSupervisor            │  one session at a time
/// └──────────────┬───────────────┘
///                ▼
/// ┌──────────────────────────────┐
/// │ SecureElement (trait)        │  ◄─── this file
/// └──────────────┬───────────────┘
///          ┌─────┴──────┐
///          ▼            ▼
///      Software     vendor driver
///      Element      (I2C, out of tree)
/// ```
///
/// # Security Principles
///
/// 1. **Keys never exposed**: no method returns private or secret key bytes
/// 2. **Fail secure**: every fault surfaces as an error, never a default value
/// 3. **No retries**: the boundary reports faults, callers decide
use crate::error::SeError;
use crate::keys::{EccCurve, KeyAlgorithm};
use crate::oid::Oid;
use std::fmt;

pub mod software;

/// Uncompressed SEC1 encoding of a P-256 public key (`0x04 || X || Y`).
pub type PublicKeyBytes = [u8; 65];

/// Metadata of a provisioned key slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfo {
    pub algorithm: KeyAlgorithm,
    pub bits: u16,
}

/// Input keying material for HKDF: either a secret held in a data slot or
/// caller-supplied bytes.
#[derive(Debug, Clone, Copy)]
pub enum Ikm<'a> {
    Object(Oid),
    Bytes(&'a [u8]),
}

/// Unified interface to a secure element
///
/// Implementations are driven exclusively through a
/// [`Session`](crate::session::Session), so methods take `&mut self` and may
/// assume no concurrent command is in flight.
///
/// Implementations MUST ensure:
/// 1. Private and secret keys never leave the element
/// 2. Unprovisioned slots are reported, not silently created
/// 3. Counter increments never wrap
pub trait SecureElement: Send {
    /// Human-readable name, e.g. "Software (Development Only)"
    fn name(&self) -> &str;

    fn security_level(&self) -> SecurityLevel;

    /// Quick liveness check without side effects.
    fn probe(&mut self) -> Result<(), SeError>;

    /// Current application lifecycle state.
    fn lifecycle_state(&mut self) -> Result<LifecycleState, SeError>;

    /// Read the raw payload of a data, certificate or identifier object.
    ///
    /// A declared but empty object yields an empty vector.
    fn read_object(&mut self, oid: Oid) -> Result<Vec<u8>, SeError>;

    /// Replace the raw payload of a data or certificate object.
    fn write_object(&mut self, oid: Oid, data: &[u8]) -> Result<(), SeError>;

    /// Store a secret into a data object. The object becomes usable as an
    /// HMAC or HKDF key and is no longer readable.
    fn write_secret(&mut self, oid: Oid, secret: &[u8]) -> Result<(), SeError>;

    /// Generate an AES key of `bits` inside the element, replacing any key
    /// previously held at `oid`.
    fn generate_symmetric_key(&mut self, oid: Oid, bits: u16) -> Result<(), SeError>;

    /// Generate an ECC key pair, returning only the public half.
    fn generate_keypair(&mut self, oid: Oid, curve: EccCurve)
        -> Result<PublicKeyBytes, SeError>;

    fn key_info(&mut self, oid: Oid) -> Result<KeyInfo, SeError>;

    fn public_key(&mut self, oid: Oid) -> Result<PublicKeyBytes, SeError>;

    /// Fill `buf` from the hardware RNG.
    fn random(&mut self, buf: &mut [u8]) -> Result<(), SeError>;

    /// AES-CBC without padding; `data` is a multiple of the block size.
    fn aes_cbc_encrypt(&mut self, oid: Oid, iv: &[u8; 16], data: &[u8])
        -> Result<Vec<u8>, SeError>;

    fn aes_cbc_decrypt(&mut self, oid: Oid, iv: &[u8; 16], data: &[u8])
        -> Result<Vec<u8>, SeError>;

    fn hmac_sha256(&mut self, oid: Oid, data: &[u8]) -> Result<[u8; 32], SeError>;

    /// ECDSA over a precomputed SHA-256 digest, DER encoded.
    fn sign_digest(&mut self, oid: Oid, digest: &[u8; 32]) -> Result<Vec<u8>, SeError>;

    /// ECDH with the private key at `oid`; returns the x-coordinate.
    fn ecdh(&mut self, oid: Oid, peer: &PublicKeyBytes) -> Result<[u8; 32], SeError>;

    fn hkdf_sha256(
        &mut self,
        ikm: Ikm<'_>,
        salt: &[u8],
        info: &[u8],
        out: &mut [u8],
    ) -> Result<(), SeError>;

    fn sha256(&mut self, data: &[u8]) -> Result<[u8; 32], SeError>;

    fn counter_read(&mut self, oid: Oid) -> Result<u32, SeError>;

    /// Atomically add `step` and return the new value.
    ///
    /// Must fail with [`SeError::CounterOverflow`] instead of wrapping.
    fn counter_increment(&mut self, oid: Oid, step: u32) -> Result<u32, SeError>;
}

/// Security level of an element implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    /// Keys in process memory. **NOT SUITABLE FOR PRODUCTION**
    Software = 0,

    /// Discrete secure element without certification
    HardwareBasic = 1,

    /// Certified secure element (CC EAL6+ class parts)
    HardwareCertified = 2,
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityLevel::Software => write!(f, "Software (Development Only)"),
            SecurityLevel::HardwareBasic => write!(f, "Hardware-Assisted"),
            SecurityLevel::HardwareCertified => write!(f, "Hardware-Certified (High Security)"),
        }
    }
}

/// Application lifecycle state reported by the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    Creation = 0x01,
    Initialization = 0x03,
    Operational = 0x07,
    Termination = 0x0F,
}

impl LifecycleState {
    pub fn from_byte(b: u8) -> Result<Self, SeError> {
        match b {
            0x01 => Ok(LifecycleState::Creation),
            0x03 => Ok(LifecycleState::Initialization),
            0x07 => Ok(LifecycleState::Operational),
            0x0F => Ok(LifecycleState::Termination),
            other => Err(SeError::HardwareFault(format!(
                "unknown lifecycle state 0x{:02X}",
                other
            ))),
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Creation => "creation",
            LifecycleState::Initialization => "initialization",
            LifecycleState::Operational => "operational",
            LifecycleState::Termination => "termination",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}
