/// Typed registry of secure element object identifiers
///
/// Every slot the client may touch is declared here once, with its kind and
/// maximum payload size. The object store validates each access against this
/// table before any command reaches the hardware, so an unknown OID or a raw
/// write into a key slot is a caller error rather than a convention.
///
/// # Allocation
///
/// ```text
/// 0xE0C2          device UID (read-only, 27 bytes)
/// 0xE0E0..0xE0E2  factory / device certificates
/// 0xE0E8..0xE0E9  trust anchor / CA chain
/// 0xE0F0..0xE0F3  ECC private keys (factory, device identity, app, spare)
/// 0xE120..0xE123  monotonic counters
/// 0xE200          AES session key
/// 0xF1D0..0xF1DB  data objects, 140 bytes (0xF1D4 reserved)
/// 0xF1E0..0xF1E1  data objects, 1500 bytes
/// ```
use crate::error::SeError;
use std::fmt;

/// 16-bit object identifier of a secure element slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(pub u16);

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Declared kind of a slot, fixed at provisioning time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// ECC private key; only the public half may leave the element
    AsymmetricKey,
    /// AES key; never readable
    SymmetricKey,
    /// Arbitrary application data (credentials, HMAC secrets, IKM)
    Data,
    /// Monotonic counter
    Counter,
    /// X.509 certificate
    Certificate,
    /// Hardware-bound identifier written at manufacture
    Identifier,
    /// Slot owned by another subsystem
    Reserved,
}

impl ObjectKind {
    /// Key kinds hold material that must never be exported.
    pub fn is_key(self) -> bool {
        matches!(self, ObjectKind::AsymmetricKey | ObjectKind::SymmetricKey)
    }

    /// Whether `read` may return the raw payload.
    pub fn raw_readable(self) -> bool {
        matches!(
            self,
            ObjectKind::Data | ObjectKind::Certificate | ObjectKind::Identifier
        )
    }

    /// Whether `write` may replace the raw payload.
    pub fn raw_writable(self) -> bool {
        matches!(self, ObjectKind::Data | ObjectKind::Certificate)
    }
}

/// Registry entry describing one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectSpec {
    pub oid: Oid,
    pub kind: ObjectKind,
    /// Maximum raw payload in bytes (0 for slots without raw access)
    pub max_len: usize,
    pub name: &'static str,
}

pub const DEVICE_UID: Oid = Oid(0xE0C2);
pub const FACTORY_CERT: Oid = Oid(0xE0E0);
pub const DEVICE_CERT: Oid = Oid(0xE0E1);
pub const DEVICE_CERT_ALT: Oid = Oid(0xE0E2);
pub const TRUST_ANCHOR: Oid = Oid(0xE0E8);
pub const CA_CHAIN: Oid = Oid(0xE0E9);
pub const FACTORY_KEY: Oid = Oid(0xE0F0);
pub const DEVICE_KEY: Oid = Oid(0xE0F1);
pub const APP_KEY: Oid = Oid(0xE0F2);
pub const SPARE_KEY: Oid = Oid(0xE0F3);
pub const COUNTER_BASE: Oid = Oid(0xE120);
pub const AES_KEY: Oid = Oid(0xE200);
pub const PROTECTED_UPDATE_SECRET: Oid = Oid(0xF1D4);

/// Length of the hardware UID stored at [`DEVICE_UID`].
pub const DEVICE_UID_LEN: usize = 27;

/// Capacity of each certificate object.
pub const CERT_MAX: usize = 1728;
const DATA_SMALL: usize = 140;
const DATA_LARGE: usize = 1500;

const fn spec(oid: u16, kind: ObjectKind, max_len: usize, name: &'static str) -> ObjectSpec {
    ObjectSpec {
        oid: Oid(oid),
        kind,
        max_len,
        name,
    }
}

static REGISTRY: &[ObjectSpec] = &[
    spec(0xE0C2, ObjectKind::Identifier, DEVICE_UID_LEN, "device-uid"),
    spec(0xE0E0, ObjectKind::Certificate, CERT_MAX, "factory-cert"),
    spec(0xE0E1, ObjectKind::Certificate, CERT_MAX, "device-cert"),
    spec(0xE0E2, ObjectKind::Certificate, CERT_MAX, "device-cert-alt"),
    spec(0xE0E8, ObjectKind::Certificate, CERT_MAX, "trust-anchor"),
    spec(0xE0E9, ObjectKind::Certificate, CERT_MAX, "ca-chain"),
    spec(0xE0F0, ObjectKind::AsymmetricKey, 0, "factory-key"),
    spec(0xE0F1, ObjectKind::AsymmetricKey, 0, "device-key"),
    spec(0xE0F2, ObjectKind::AsymmetricKey, 0, "app-key"),
    spec(0xE0F3, ObjectKind::AsymmetricKey, 0, "spare-key"),
    spec(0xE120, ObjectKind::Counter, 4, "counter-message-seq"),
    spec(0xE121, ObjectKind::Counter, 4, "counter-boot"),
    spec(0xE122, ObjectKind::Counter, 4, "counter-firmware"),
    spec(0xE123, ObjectKind::Counter, 4, "counter-security-event"),
    spec(0xE200, ObjectKind::SymmetricKey, 0, "aes-session-key"),
    spec(0xF1D0, ObjectKind::Data, DATA_SMALL, "data-0"),
    spec(0xF1D1, ObjectKind::Data, DATA_SMALL, "data-1"),
    spec(0xF1D2, ObjectKind::Data, DATA_SMALL, "data-2"),
    spec(0xF1D3, ObjectKind::Data, DATA_SMALL, "data-3"),
    spec(0xF1D4, ObjectKind::Reserved, 0, "protected-update-secret"),
    spec(0xF1D5, ObjectKind::Data, DATA_SMALL, "data-5"),
    spec(0xF1D6, ObjectKind::Data, DATA_SMALL, "data-6"),
    spec(0xF1D7, ObjectKind::Data, DATA_SMALL, "data-7"),
    spec(0xF1D8, ObjectKind::Data, DATA_SMALL, "data-8"),
    spec(0xF1D9, ObjectKind::Data, DATA_SMALL, "data-9"),
    spec(0xF1DA, ObjectKind::Data, DATA_SMALL, "data-10"),
    spec(0xF1DB, ObjectKind::Data, DATA_SMALL, "data-11"),
    spec(0xF1E0, ObjectKind::Data, DATA_LARGE, "data-12"),
    spec(0xF1E1, ObjectKind::Data, DATA_LARGE, "data-13"),
];

/// All provisioned slots.
pub fn registry() -> &'static [ObjectSpec] {
    REGISTRY
}

/// Look up the declaration of `oid`.
///
/// Unknown identifiers are rejected with [`SeError::NotFound`]; they never
/// reach the hardware.
pub fn lookup(oid: Oid) -> Result<&'static ObjectSpec, SeError> {
    REGISTRY
        .iter()
        .find(|s| s.oid == oid)
        .ok_or(SeError::NotFound(oid))
}

/// Look up `oid` and require a specific kind.
pub fn expect_kind(oid: Oid, kind: ObjectKind) -> Result<&'static ObjectSpec, SeError> {
    let spec = lookup(oid)?;
    if spec.kind != kind {
        return Err(SeError::InvalidParameter(format!(
            "{} ({}) is {:?}, expected {:?}",
            oid, spec.name, spec.kind, kind
        )));
    }
    Ok(spec)
}

/// Whether `oid` lies in the data-slot range reserved for HMAC secrets.
pub fn is_hmac_slot(oid: Oid) -> bool {
    (0xF1D0..=0xF1DB).contains(&oid.0) && oid != PROTECTED_UPDATE_SECRET
}

/// Developer-facing secure storage slot (0-13).
///
/// Slots 0-11 map onto the 140-byte data objects, 12-13 onto the 1500-byte
/// ones. Slot 4 aliases the protected-update secret and is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataSlot(pub u8);

impl DataSlot {
    pub const MAX: u8 = 13;
    pub const RESERVED: u8 = 4;

    pub fn to_oid(self) -> Result<Oid, SeError> {
        match self.0 {
            Self::RESERVED => Err(SeError::AccessDenied(format!(
                "slot {} is reserved for the protected-update secret",
                self.0
            ))),
            n @ 0..=11 => Ok(Oid(0xF1D0 + n as u16)),
            12 => Ok(Oid(0xF1E0)),
            13 => Ok(Oid(0xF1E1)),
            n => Err(SeError::InvalidParameter(format!(
                "data slot {} out of range (0-{})",
                n,
                Self::MAX
            ))),
        }
    }
}

/// Monotonic counter index (0-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterId(pub u8);

impl CounterId {
    pub const MESSAGE_SEQ: CounterId = CounterId(0);
    pub const BOOT: CounterId = CounterId(1);
    pub const FIRMWARE: CounterId = CounterId(2);
    pub const SECURITY_EVENT: CounterId = CounterId(3);
    pub const MAX: u8 = 3;

    pub fn to_oid(self) -> Result<Oid, SeError> {
        if self.0 > Self::MAX {
            return Err(SeError::InvalidParameter(format!(
                "counter id {} out of range (0-{})",
                self.0,
                Self::MAX
            )));
        }
        Ok(Oid(COUNTER_BASE.0 + self.0 as u16))
    }
}
