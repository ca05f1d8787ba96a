/// Software secure element (development/testing only)
///
/// Simulates a secure element in process memory using RustCrypto
/// primitives. Slots follow the object registry in [`crate::oid`], so code
/// exercised against this element behaves the same against real hardware.
///
/// # Security Warning
///
/// **NOT SUITABLE FOR PRODUCTION USE**
///
/// - Keys stored in process memory (zeroized on drop, nothing more)
/// - No physical security
/// - Counters are not persisted
///
/// Use only for development, CI and host-side simulation.
use super::{Ikm, KeyInfo, LifecycleState, PublicKeyBytes, SecureElement, SecurityLevel};
use crate::error::SeError;
use crate::keys::{EccCurve, KeyAlgorithm, HMAC_KEY_MAX, HMAC_KEY_MIN};
use crate::oid::{self, ObjectKind, Oid, DEVICE_UID, DEVICE_UID_LEN};
use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use p256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

macro_rules! cbc_encrypt {
    ($cipher:ty, $key:expr, $iv:expr, $buf:expr) => {{
        let len = $buf.len();
        cbc::Encryptor::<$cipher>::new_from_slices($key, $iv)
            .map_err(|_| SeError::HardwareFault("AES key length mismatch".into()))?
            .encrypt_padded_mut::<NoPadding>($buf, len)
            .map_err(|_| SeError::InvalidLength("AES-CBC input is not block aligned".into()))?;
    }};
}

macro_rules! cbc_decrypt {
    ($cipher:ty, $key:expr, $iv:expr, $buf:expr) => {{
        cbc::Decryptor::<$cipher>::new_from_slices($key, $iv)
            .map_err(|_| SeError::HardwareFault("AES key length mismatch".into()))?
            .decrypt_padded_mut::<NoPadding>($buf)
            .map_err(|_| SeError::InvalidLength("AES-CBC input is not block aligned".into()))?;
    }};
}

/// Contents of one provisioned slot.
enum Slot {
    Data(Vec<u8>),
    Secret(Zeroizing<Vec<u8>>),
    Aes(Zeroizing<Vec<u8>>),
    Ecc(SigningKey),
    Counter(u32),
}

/// In-memory slot table keyed by OID.
struct ObjectStore {
    slots: HashMap<Oid, Slot>,
}

impl ObjectStore {
    fn new() -> Self {
        ObjectStore {
            slots: HashMap::new(),
        }
    }

    fn get(&self, oid: Oid) -> Option<&Slot> {
        self.slots.get(&oid)
    }

    fn insert(&mut self, oid: Oid, slot: Slot) {
        self.slots.insert(oid, slot);
    }

    fn remove(&mut self, oid: Oid) -> Option<Slot> {
        self.slots.remove(&oid)
    }
}

/// Shared switch that makes every element command fail with
/// [`SeError::HardwareFault`] while tripped.
///
/// Obtain one with [`SoftwareElement::fault_injector`] before handing the
/// element to a [`SessionSupervisor`](crate::session::SessionSupervisor).
#[derive(Debug, Clone, Default)]
pub struct FaultInjector(Arc<AtomicBool>);

impl FaultInjector {
    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Software secure element implementation
///
/// # Example
///
/// ```ignore
/// use seclient::platform::software::SoftwareElement;
/// use seclient::session::SessionSupervisor;
///
/// let element = SoftwareElement::with_uid([0x42; 27]);
/// let faults = element.fault_injector();
/// let supervisor = SessionSupervisor::new(Box::new(element));
/// ```
pub struct SoftwareElement {
    store: ObjectStore,
    lifecycle: LifecycleState,
    fault: FaultInjector,
}

impl SoftwareElement {
    /// Create an element with a random UID and zeroed counters.
    pub fn new() -> Self {
        let mut uid = [0u8; DEVICE_UID_LEN];
        if getrandom::getrandom(&mut uid).is_err() {
            log::warn!("OS RNG unavailable, software element UID left zeroed");
        }
        Self::with_uid(uid)
    }

    /// Create an element whose identifier object holds `uid`.
    pub fn with_uid(uid: [u8; DEVICE_UID_LEN]) -> Self {
        let mut element = Self::blank();
        element.store.insert(DEVICE_UID, Slot::Data(uid.to_vec()));
        element
    }

    /// Create an element with no UID provisioned.
    pub fn blank() -> Self {
        log::warn!(
            "Creating software secure element - NOT SUITABLE FOR PRODUCTION. \
             Keys are stored in process memory without hardware protection."
        );

        let mut store = ObjectStore::new();
        for spec in oid::registry()
            .iter()
            .filter(|s| s.kind == ObjectKind::Counter)
        {
            store.insert(spec.oid, Slot::Counter(0));
        }

        SoftwareElement {
            store,
            lifecycle: LifecycleState::Operational,
            fault: FaultInjector::default(),
        }
    }

    /// Factory provisioning: write any raw-readable object, including the
    /// read-only identifier, bypassing access rules.
    pub fn provision_object(&mut self, oid: Oid, data: &[u8]) -> Result<(), SeError> {
        let spec = oid::lookup(oid)?;
        if !spec.kind.raw_readable() {
            return Err(SeError::InvalidParameter(format!(
                "{} is not a raw object",
                oid
            )));
        }
        check_size(spec, data.len())?;
        self.store.insert(oid, Slot::Data(data.to_vec()));
        Ok(())
    }

    /// Factory provisioning: preset a counter value.
    pub fn provision_counter(&mut self, oid: Oid, value: u32) -> Result<(), SeError> {
        oid::expect_kind(oid, ObjectKind::Counter)?;
        self.store.insert(oid, Slot::Counter(value));
        Ok(())
    }

    /// Remove whatever is stored at `oid`.
    pub fn erase_object(&mut self, oid: Oid) {
        self.store.remove(oid);
    }

    pub fn set_lifecycle(&mut self, state: LifecycleState) {
        self.lifecycle = state;
    }

    /// Handle to the fault switch of this element.
    pub fn fault_injector(&self) -> FaultInjector {
        self.fault.clone()
    }

    pub fn set_fault(&self, enabled: bool) {
        if enabled {
            self.fault.trip();
        } else {
            self.fault.clear();
        }
    }

    fn check_fault(&self, op: &str) -> Result<(), SeError> {
        if self.fault.is_tripped() {
            return Err(SeError::HardwareFault(format!("injected fault during {}", op)));
        }
        Ok(())
    }

    fn aes_key(&self, oid: Oid) -> Result<&[u8], SeError> {
        match self.store.get(oid) {
            Some(Slot::Aes(key)) => Ok(key.as_slice()),
            Some(_) => Err(SeError::InvalidParameter(format!(
                "{} does not hold an AES key",
                oid
            ))),
            None => Err(SeError::NotFound(oid)),
        }
    }

    fn ecc_key(&self, oid: Oid) -> Result<&SigningKey, SeError> {
        match self.store.get(oid) {
            Some(Slot::Ecc(key)) => Ok(key),
            Some(_) => Err(SeError::InvalidParameter(format!(
                "{} does not hold an ECC key",
                oid
            ))),
            None => Err(SeError::NotFound(oid)),
        }
    }

    /// Keying material of an HMAC-range slot: an imported secret, or plain
    /// data written through the store.
    fn secret(&self, oid: Oid) -> Result<&[u8], SeError> {
        match self.store.get(oid) {
            Some(Slot::Secret(secret)) => Ok(secret.as_slice()),
            Some(Slot::Data(data))
                if oid::is_hmac_slot(oid)
                    && (HMAC_KEY_MIN..=HMAC_KEY_MAX).contains(&data.len()) =>
            {
                Ok(data.as_slice())
            }
            Some(_) => Err(SeError::InvalidParameter(format!(
                "{} does not hold a shared secret",
                oid
            ))),
            None => Err(SeError::NotFound(oid)),
        }
    }

    fn fill_random(buf: &mut [u8]) -> Result<(), SeError> {
        getrandom::getrandom(buf).map_err(|e| SeError::HardwareFault(format!("RNG: {}", e)))
    }

    fn random_signing_key() -> Result<SigningKey, SeError> {
        // Rejection sampling: zero and values >= n are not valid scalars.
        loop {
            let mut bytes = Zeroizing::new([0u8; 32]);
            Self::fill_random(bytes.as_mut())?;
            if let Ok(key) = SigningKey::from_slice(bytes.as_ref()) {
                return Ok(key);
            }
        }
    }
}

impl Default for SoftwareElement {
    fn default() -> Self {
        Self::new()
    }
}

fn check_size(spec: &oid::ObjectSpec, len: usize) -> Result<(), SeError> {
    if len > spec.max_len {
        return Err(SeError::SizeExceeded {
            oid: spec.oid,
            len,
            max: spec.max_len,
        });
    }
    Ok(())
}

fn encode_public(key: &SigningKey) -> PublicKeyBytes {
    let public = p256::PublicKey::from(key.verifying_key());
    let point = public.to_encoded_point(false);
    let mut out = [0u8; 65];
    out.copy_from_slice(point.as_bytes());
    out
}

impl SecureElement for SoftwareElement {
    fn name(&self) -> &str {
        "Software (Development Only)"
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Software
    }

    fn probe(&mut self) -> Result<(), SeError> {
        self.check_fault("probe")
    }

    fn lifecycle_state(&mut self) -> Result<LifecycleState, SeError> {
        self.check_fault("lifecycle read")?;
        Ok(self.lifecycle)
    }

    fn read_object(&mut self, oid: Oid) -> Result<Vec<u8>, SeError> {
        self.check_fault("read")?;
        let spec = oid::lookup(oid)?;
        match self.store.get(oid) {
            Some(Slot::Data(data)) => Ok(data.clone()),
            Some(_) => Err(SeError::AccessDenied(format!("{} is not readable", oid))),
            None if spec.kind.raw_readable() => Ok(Vec::new()),
            None => Err(SeError::NotFound(oid)),
        }
    }

    fn write_object(&mut self, oid: Oid, data: &[u8]) -> Result<(), SeError> {
        self.check_fault("write")?;
        let spec = oid::lookup(oid)?;
        if !spec.kind.raw_writable() {
            return Err(SeError::AccessDenied(format!("{} is not writable", oid)));
        }
        if let Some(Slot::Secret(_)) = self.store.get(oid) {
            return Err(SeError::AccessDenied(format!(
                "{} holds a shared secret",
                oid
            )));
        }
        check_size(spec, data.len())?;
        self.store.insert(oid, Slot::Data(data.to_vec()));
        Ok(())
    }

    fn write_secret(&mut self, oid: Oid, secret: &[u8]) -> Result<(), SeError> {
        self.check_fault("write secret")?;
        let spec = oid::expect_kind(oid, ObjectKind::Data)?;
        check_size(spec, secret.len())?;
        self.store
            .insert(oid, Slot::Secret(Zeroizing::new(secret.to_vec())));
        Ok(())
    }

    fn generate_symmetric_key(&mut self, oid: Oid, bits: u16) -> Result<(), SeError> {
        self.check_fault("AES key generation")?;
        oid::expect_kind(oid, ObjectKind::SymmetricKey)?;
        if !matches!(bits, 128 | 192 | 256) {
            return Err(SeError::UnsupportedLength(bits));
        }
        let mut key = Zeroizing::new(vec![0u8; bits as usize / 8]);
        Self::fill_random(key.as_mut_slice())?;
        self.store.insert(oid, Slot::Aes(key));
        Ok(())
    }

    fn generate_keypair(
        &mut self,
        oid: Oid,
        curve: EccCurve,
    ) -> Result<PublicKeyBytes, SeError> {
        self.check_fault("key pair generation")?;
        oid::expect_kind(oid, ObjectKind::AsymmetricKey)?;
        match curve {
            EccCurve::NistP256 => {}
        }
        let key = Self::random_signing_key()?;
        let public = encode_public(&key);
        self.store.insert(oid, Slot::Ecc(key));
        Ok(public)
    }

    fn key_info(&mut self, oid: Oid) -> Result<KeyInfo, SeError> {
        self.check_fault("key metadata read")?;
        oid::lookup(oid)?;
        match self.store.get(oid) {
            Some(Slot::Aes(key)) => Ok(KeyInfo {
                algorithm: KeyAlgorithm::Aes,
                bits: (key.len() * 8) as u16,
            }),
            Some(Slot::Ecc(_)) => Ok(KeyInfo {
                algorithm: KeyAlgorithm::EcdsaP256,
                bits: 256,
            }),
            Some(Slot::Secret(_)) | Some(Slot::Data(_)) if oid::is_hmac_slot(oid) => {
                let secret = self.secret(oid)?;
                Ok(KeyInfo {
                    algorithm: KeyAlgorithm::HmacSha256,
                    bits: (secret.len() * 8) as u16,
                })
            }
            _ => Err(SeError::NotFound(oid)),
        }
    }

    fn public_key(&mut self, oid: Oid) -> Result<PublicKeyBytes, SeError> {
        self.check_fault("public key read")?;
        Ok(encode_public(self.ecc_key(oid)?))
    }

    fn random(&mut self, buf: &mut [u8]) -> Result<(), SeError> {
        self.check_fault("random")?;
        Self::fill_random(buf)
    }

    fn aes_cbc_encrypt(
        &mut self,
        oid: Oid,
        iv: &[u8; 16],
        data: &[u8],
    ) -> Result<Vec<u8>, SeError> {
        self.check_fault("AES encrypt")?;
        let key = self.aes_key(oid)?;
        let mut buf = data.to_vec();
        match key.len() {
            16 => cbc_encrypt!(Aes128, key, iv, &mut buf),
            24 => cbc_encrypt!(Aes192, key, iv, &mut buf),
            _ => cbc_encrypt!(Aes256, key, iv, &mut buf),
        }
        Ok(buf)
    }

    fn aes_cbc_decrypt(
        &mut self,
        oid: Oid,
        iv: &[u8; 16],
        data: &[u8],
    ) -> Result<Vec<u8>, SeError> {
        self.check_fault("AES decrypt")?;
        let key = self.aes_key(oid)?;
        let mut buf = data.to_vec();
        match key.len() {
            16 => cbc_decrypt!(Aes128, key, iv, &mut buf),
            24 => cbc_decrypt!(Aes192, key, iv, &mut buf),
            _ => cbc_decrypt!(Aes256, key, iv, &mut buf),
        }
        Ok(buf)
    }

    fn hmac_sha256(&mut self, oid: Oid, data: &[u8]) -> Result<[u8; 32], SeError> {
        self.check_fault("HMAC")?;
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.secret(oid)?)
            .map_err(|_| SeError::HardwareFault("HMAC key rejected".into()))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }

    fn sign_digest(&mut self, oid: Oid, digest: &[u8; 32]) -> Result<Vec<u8>, SeError> {
        self.check_fault("sign")?;
        let signature: Signature = self
            .ecc_key(oid)?
            .sign_prehash(digest)
            .map_err(|e| SeError::HardwareFault(format!("ECDSA: {}", e)))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn ecdh(&mut self, oid: Oid, peer: &PublicKeyBytes) -> Result<[u8; 32], SeError> {
        self.check_fault("ECDH")?;
        let key = self.ecc_key(oid)?;
        let peer = p256::PublicKey::from_sec1_bytes(peer).map_err(|_| {
            SeError::InvalidParameter("peer public key is not a P-256 point".into())
        })?;
        let shared = p256::ecdh::diffie_hellman(key.as_nonzero_scalar(), peer.as_affine());
        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(out)
    }

    fn hkdf_sha256(
        &mut self,
        ikm: Ikm<'_>,
        salt: &[u8],
        info: &[u8],
        out: &mut [u8],
    ) -> Result<(), SeError> {
        self.check_fault("HKDF")?;
        let ikm = match ikm {
            Ikm::Object(oid) => self.secret(oid)?,
            Ikm::Bytes(bytes) => bytes,
        };
        let salt = if salt.is_empty() { None } else { Some(salt) };
        let len = out.len();
        hkdf::Hkdf::<Sha256>::new(salt, ikm)
            .expand(info, out)
            .map_err(|_| SeError::InvalidLength(format!("HKDF output of {} bytes", len)))
    }

    fn sha256(&mut self, data: &[u8]) -> Result<[u8; 32], SeError> {
        self.check_fault("hash")?;
        Ok(Sha256::digest(data).into())
    }

    fn counter_read(&mut self, oid: Oid) -> Result<u32, SeError> {
        self.check_fault("counter read")?;
        oid::expect_kind(oid, ObjectKind::Counter)?;
        match self.store.get(oid) {
            Some(Slot::Counter(value)) => Ok(*value),
            _ => Err(SeError::NotFound(oid)),
        }
    }

    fn counter_increment(&mut self, oid: Oid, step: u32) -> Result<u32, SeError> {
        self.check_fault("counter increment")?;
        oid::expect_kind(oid, ObjectKind::Counter)?;
        match self.store.slots.get_mut(&oid) {
            Some(Slot::Counter(value)) => {
                let next = value
                    .checked_add(step)
                    .ok_or(SeError::CounterOverflow(oid))?;
                *value = next;
                Ok(next)
            }
            _ => Err(SeError::NotFound(oid)),
        }
    }
}
