//! Firmware-facing client surface.
//!
//! [`DeviceClient`] owns the element through a [`SessionSupervisor`] and
//! exposes the flat operation set application firmware calls. Every
//! operation except [`license_init`](DeviceClient::license_init),
//! [`is_licensed`](DeviceClient::is_licensed) and
//! [`health_check`](DeviceClient::health_check) fails until the license
//! has verified: with [`SeError::LicenseInvalid`] after a failed check and
//! [`SeError::NotLicensed`] before any successful one.
//!
//! ```ignore
//! let client = DeviceClient::new(Box::new(element), config)?;
//! if client.license_init()? != LicenseStatus::Valid {
//!     return Err(SeError::LicenseInvalid);
//! }
//! let reading = client.secure_store_read(0)?;
//! ```

use crate::audit;
use crate::auth::{self, Authenticator, ChallengeMessage, ResponseMessage};
use crate::channel::{Envelope, SecureChannel};
use crate::config::ClientConfig;
use crate::counter::{self, CountedMessage};
use crate::crypto::{self, KeyMaterial, IV_SIZE};
use crate::error::SeError;
use crate::health::{self, HealthReport};
use crate::keys::{self, KeyHandle, PublicKey};
use crate::license::{LicenseStatus, LicenseVerifier};
use crate::oid::{self, CounterId, DataSlot, Oid, AES_KEY, DEVICE_UID, DEVICE_UID_LEN};
use crate::platform::SecureElement;
use crate::session::{Session, SessionSupervisor};
use crate::store;
use crate::time::{SystemTimeSource, TimeSource};
use parking_lot::RwLock;
use std::sync::Arc;

pub struct DeviceClient {
    supervisor: SessionSupervisor,
    config: ClientConfig,
    verifier: LicenseVerifier,
    clock: Arc<dyn TimeSource>,
    license: RwLock<LicenseStatus>,
}

impl DeviceClient {
    /// Client over `element`, verifying licenses with the build-time
    /// issuer key and reading time from the system clock.
    pub fn new(element: Box<dyn SecureElement>, config: ClientConfig) -> Result<Self, SeError> {
        config.validate()?;
        let supervisor = SessionSupervisor::new(element).with_timeout(config.session_timeout());
        Ok(DeviceClient {
            supervisor,
            config,
            verifier: LicenseVerifier::embedded()?,
            clock: Arc::new(SystemTimeSource),
            license: RwLock::new(LicenseStatus::NotProvisioned),
        })
    }

    /// Replace the issuer key. Resets the license state.
    pub fn with_issuer_key(mut self, issuer_key: PublicKey) -> Self {
        self.verifier = LicenseVerifier::new(issuer_key);
        *self.license.get_mut() = LicenseStatus::NotProvisioned;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn TimeSource> {
        Arc::clone(&self.clock)
    }

    /// Verify the configured license against the element UID.
    ///
    /// Call once at startup. The result gates every other operation.
    pub fn license_init(&self) -> Result<LicenseStatus, SeError> {
        let mut session = self.supervisor.acquire()?;
        let status = match self.verifier.check(&mut session, &self.config.license) {
            Ok(status) => status,
            Err(e) => {
                *self.license.write() = LicenseStatus::NotProvisioned;
                return Err(e);
            }
        };
        *self.license.write() = status;
        if !status.is_valid() {
            log::error!("license check failed ({}), client operations disabled", status);
        }
        Ok(status)
    }

    /// Library version.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Hardware UID of the element. Available without a license, since
    /// the UID is what a license gets issued for.
    pub fn device_uid(&self) -> Result<Vec<u8>, SeError> {
        let mut session = self.supervisor.acquire()?;
        let uid = store::read(&mut session, DEVICE_UID, DEVICE_UID_LEN)?;
        if uid.is_empty() {
            return Err(SeError::NotFound(DEVICE_UID));
        }
        Ok(uid)
    }

    /// [`device_uid`](Self::device_uid) as upper-case hex.
    pub fn device_uid_hex(&self) -> Result<String, SeError> {
        Ok(hex::encode_upper(self.device_uid()?))
    }

    pub fn is_licensed(&self) -> bool {
        self.license.read().is_valid()
    }

    pub fn license_status(&self) -> LicenseStatus {
        *self.license.read()
    }

    fn session(&self) -> Result<Session<'_>, SeError> {
        match self.license_status() {
            LicenseStatus::Valid => self.supervisor.acquire(),
            LicenseStatus::Invalid => Err(SeError::LicenseInvalid),
            LicenseStatus::NotProvisioned => Err(SeError::NotLicensed),
        }
    }

    fn run<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut Session<'_>) -> Result<T, SeError>,
    ) -> Result<T, SeError> {
        let mut session = self.session()?;
        let result = f(&mut session);
        if let Err(SeError::HardwareFault(msg)) = &result {
            audit::log_element_fault(operation, msg);
        }
        result
    }

    /// Run `f` inside one licensed session.
    ///
    /// For sequences that must not interleave with other callers, such as
    /// provisioning a key pair and exporting its public half.
    pub fn with_session<T>(
        &self,
        f: impl FnOnce(&mut Session<'_>) -> Result<T, SeError>,
    ) -> Result<T, SeError> {
        self.run("with_session", f)
    }

    pub fn random_generate(&self, len: usize) -> Result<Vec<u8>, SeError> {
        self.run("random_generate", |s| crypto::random_bytes(s, len))
    }

    /// Write application data into secure store slot 0-13.
    pub fn secure_store_write(&self, slot: u8, data: &[u8]) -> Result<(), SeError> {
        let oid = DataSlot(slot).to_oid()?;
        self.run("secure_store_write", |s| store::write(s, oid, data))
    }

    pub fn secure_store_read(&self, slot: u8) -> Result<Vec<u8>, SeError> {
        let oid = DataSlot(slot).to_oid()?;
        let max_len = oid::lookup(oid)?.max_len;
        self.run("secure_store_read", |s| store::read(s, oid, max_len))
    }

    /// Generate the AES session key (128, 192 or 256 bits).
    pub fn aes_generate_key(&self, bits: u16) -> Result<KeyHandle, SeError> {
        self.run("aes_generate_key", |s| {
            keys::generate_symmetric_key(s, AES_KEY, bits)
        })
    }

    /// AES-CBC encrypt block-aligned `plaintext` under the session key.
    pub fn aes_encrypt(
        &self,
        plaintext: &[u8],
        iv: Option<[u8; IV_SIZE]>,
    ) -> Result<([u8; IV_SIZE], Vec<u8>), SeError> {
        self.run("aes_encrypt", |s| {
            let key = keys::load_key(s, AES_KEY)?;
            crypto::aes_encrypt(s, &key, plaintext, iv)
        })
    }

    pub fn aes_decrypt(&self, iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>, SeError> {
        self.run("aes_decrypt", |s| {
            let key = keys::load_key(s, AES_KEY)?;
            crypto::aes_decrypt(s, &key, iv, ciphertext)
        })
    }

    /// HMAC-SHA256 keyed by the secret in `key_oid` (HMAC range).
    pub fn hmac_sha256(&self, key_oid: Oid, data: &[u8]) -> Result<[u8; 32], SeError> {
        self.run("hmac_sha256", |s| {
            let key = keys::load_key(s, key_oid)?;
            crypto::hmac_sha256(s, &key, data)
        })
    }

    /// Store an HMAC secret in an HMAC-range slot.
    pub fn hmac_import_key(&self, key_oid: Oid, secret: &[u8]) -> Result<KeyHandle, SeError> {
        self.run("hmac_import_key", |s| keys::import_hmac_key(s, key_oid, secret))
    }

    pub fn ecdh_shared_secret(&self, key_oid: Oid, peer_public: &[u8]) -> Result<[u8; 32], SeError> {
        self.run("ecdh_shared_secret", |s| {
            let key = keys::load_key(s, key_oid)?;
            crypto::ecdh_shared_secret(s, &key, peer_public)
        })
    }

    pub fn hkdf_derive(
        &self,
        ikm: KeyMaterial<'_>,
        salt: &[u8],
        info: &[u8],
        out_len: usize,
    ) -> Result<Vec<u8>, SeError> {
        self.run("hkdf_derive", |s| {
            crypto::hkdf_derive(s, ikm, salt, info, out_len)
        })
    }

    pub fn hash(&self, data: &[u8]) -> Result<[u8; 32], SeError> {
        self.run("hash", |s| crypto::hash(s, data))
    }

    /// ECDSA P-256 signature (DER) over SHA-256 of `data`.
    pub fn sign_data(&self, key_oid: Oid, data: &[u8]) -> Result<Vec<u8>, SeError> {
        self.run("sign_data", |s| {
            let key = keys::load_key(s, key_oid)?;
            crypto::sign_data(s, &key, data)
        })
    }

    pub fn public_key(&self, key_oid: Oid) -> Result<PublicKey, SeError> {
        self.run("public_key", |s| {
            let key = keys::load_key(s, key_oid)?;
            keys::export_public_key(s, &key)
        })
    }

    pub fn counter_read(&self, counter: CounterId) -> Result<u32, SeError> {
        let oid = counter.to_oid()?;
        self.run("counter_read", |s| counter::read_counter(s, oid))
    }

    pub fn counter_increment(&self, counter: CounterId) -> Result<u32, SeError> {
        let oid = counter.to_oid()?;
        self.run("counter_increment", |s| counter::increment_counter(s, oid))
    }

    /// Sign `data` bound to the next message sequence number.
    pub fn seal_counted(&self, key_oid: Oid, data: &str) -> Result<CountedMessage, SeError> {
        let counter_oid = CounterId::MESSAGE_SEQ.to_oid()?;
        self.run("seal_counted", |s| {
            let key = keys::load_key(s, key_oid)?;
            counter::seal_counted(s, counter_oid, &key, data)
        })
    }

    /// Secure channel over the session AES key and the HMAC key in
    /// `mac_key_oid`, framed per this client's config.
    pub fn secure_channel(&self, mac_key_oid: Oid) -> Result<SecureChannel, SeError> {
        let (aes, mac) = self.run("secure_channel", |s| {
            Ok((keys::load_key(s, AES_KEY)?, keys::load_key(s, mac_key_oid)?))
        })?;
        self.config.channel(aes, mac)
    }

    pub fn channel_send(&self, channel: &SecureChannel, plaintext: &[u8]) -> Result<Envelope, SeError> {
        self.run("channel_send", |s| channel.send(s, plaintext))
    }

    pub fn channel_receive(&self, channel: &SecureChannel, envelope: &Envelope) -> Result<Vec<u8>, SeError> {
        self.run("channel_receive", |s| channel.receive(s, envelope))
    }

    /// Verifier for a peer whose identity key is `peer_key`.
    pub fn authenticator(&self, peer_key: PublicKey) -> Authenticator {
        Authenticator::new(peer_key, self.clock()).with_expiry(self.config.challenge_expiry_secs)
    }

    pub fn issue_challenge(&self, authenticator: &mut Authenticator) -> Result<ChallengeMessage, SeError> {
        self.run("issue_challenge", |s| authenticator.issue_challenge(s))
    }

    /// Answer a challenge with the identity key in `key_oid`.
    pub fn respond_challenge(
        &self,
        key_oid: Oid,
        challenge: &ChallengeMessage,
    ) -> Result<ResponseMessage, SeError> {
        self.run("respond_challenge", |s| {
            let key = keys::load_key(s, key_oid)?;
            auth::respond(s, &key, challenge)
        })
    }

    /// Element status. Available without a license.
    pub fn health_check(&self) -> Result<HealthReport, SeError> {
        let mut session = self.supervisor.acquire()?;
        Ok(health::health_check(
            &mut session,
            self.license_status(),
            self.clock.as_ref(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::{DEVICE_KEY, DEVICE_UID_LEN};
    use crate::platform::software::SoftwareElement;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use p256::ecdsa::{signature::Signer, Signature, SigningKey};

    const UID: [u8; DEVICE_UID_LEN] = [0x5A; DEVICE_UID_LEN];

    fn issuer() -> (SigningKey, PublicKey) {
        let sk = SigningKey::from_slice(&[0x33; 32]).unwrap();
        let pk = PublicKey::from_sec1_bytes(sk.verifying_key().to_encoded_point(false).as_bytes())
            .unwrap();
        (sk, pk)
    }

    fn licensed_client() -> DeviceClient {
        let (sk, pk) = issuer();
        let sig: Signature = sk.sign(&UID);
        let config = ClientConfig::default().with_license_key(STANDARD.encode(sig.to_der()));
        let client = DeviceClient::new(Box::new(SoftwareElement::with_uid(UID)), config)
            .unwrap()
            .with_issuer_key(pk);
        assert_eq!(client.license_init().unwrap(), LicenseStatus::Valid);
        client
    }

    #[test]
    fn test_operations_gated_before_license() {
        let (_, pk) = issuer();
        let client = DeviceClient::new(
            Box::new(SoftwareElement::with_uid(UID)),
            ClientConfig::default(),
        )
        .unwrap()
        .with_issuer_key(pk);

        assert!(!client.is_licensed());
        assert!(matches!(client.random_generate(16), Err(SeError::NotLicensed)));
        assert!(matches!(client.secure_store_read(0), Err(SeError::NotLicensed)));
        assert!(matches!(
            client.counter_read(CounterId::BOOT),
            Err(SeError::NotLicensed)
        ));

        assert_eq!(client.license_init().unwrap(), LicenseStatus::NotProvisioned);
        assert!(matches!(client.hash(b"x"), Err(SeError::NotLicensed)));
        assert!(!client.health_check().unwrap().license_ok);
    }

    #[test]
    fn test_device_uid_readable_before_license() {
        let client = DeviceClient::new(
            Box::new(SoftwareElement::with_uid(UID)),
            ClientConfig::default(),
        )
        .unwrap();
        assert!(!client.is_licensed());
        assert_eq!(client.device_uid().unwrap(), UID);
        assert_eq!(client.device_uid_hex().unwrap(), "5A".repeat(DEVICE_UID_LEN));

        let blank = DeviceClient::new(Box::new(SoftwareElement::blank()), ClientConfig::default())
            .unwrap();
        assert!(matches!(blank.device_uid(), Err(SeError::NotFound(_))));
    }

    #[test]
    fn test_version() {
        assert_eq!(DeviceClient::version(), env!("CARGO_PKG_VERSION"));
        assert!(!DeviceClient::version().is_empty());
    }

    #[test]
    fn test_invalid_license_stays_gated() {
        let (_, pk) = issuer();
        let rogue = SigningKey::from_slice(&[0x44; 32]).unwrap();
        let sig: Signature = rogue.sign(&UID);
        let config = ClientConfig::default().with_license_key(STANDARD.encode(sig.to_der()));
        let client = DeviceClient::new(Box::new(SoftwareElement::with_uid(UID)), config)
            .unwrap()
            .with_issuer_key(pk);
        assert_eq!(client.license_init().unwrap(), LicenseStatus::Invalid);
        assert!(matches!(client.random_generate(16), Err(SeError::LicenseInvalid)));
    }

    #[test]
    fn test_store_slots() {
        let client = licensed_client();
        client.secure_store_write(0, b"config-v1").unwrap();
        assert_eq!(client.secure_store_read(0).unwrap(), b"config-v1");
        client.secure_store_write(13, &[0xAB; 1500]).unwrap();
        assert_eq!(client.secure_store_read(13).unwrap().len(), 1500);

        assert!(matches!(
            client.secure_store_write(4, b"x"),
            Err(SeError::AccessDenied(_))
        ));
        assert!(matches!(
            client.secure_store_write(14, b"x"),
            Err(SeError::InvalidParameter(_))
        ));
        assert!(matches!(
            client.secure_store_write(1, &[0u8; 141]),
            Err(SeError::SizeExceeded { .. })
        ));
    }

    #[test]
    fn test_aes_round_trip() {
        let client = licensed_client();
        client.aes_generate_key(128).unwrap();
        let plaintext = [0x42u8; 32];
        let (iv, ct) = client.aes_encrypt(&plaintext, None).unwrap();
        assert_ne!(ct, plaintext);
        assert_eq!(client.aes_decrypt(&iv, &ct).unwrap(), plaintext);
    }

    #[test]
    fn test_sign_and_counters() {
        let client = licensed_client();
        let public = client
            .with_session(|s| {
                keys::generate_asymmetric_keypair(s, DEVICE_KEY, keys::EccCurve::NistP256)
                    .map(|(_, pk)| pk)
            })
            .unwrap();
        let sig = client.sign_data(DEVICE_KEY, b"payload").unwrap();
        crypto::verify_signature(&public, b"payload", &sig).unwrap();
        assert_eq!(client.public_key(DEVICE_KEY).unwrap(), public);

        let before = client.counter_read(CounterId::SECURITY_EVENT).unwrap();
        assert_eq!(
            client.counter_increment(CounterId::SECURITY_EVENT).unwrap(),
            before + 1
        );
        assert!(matches!(
            client.counter_read(CounterId(4)),
            Err(SeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_element_fault_surfaces() {
        let (sk, pk) = issuer();
        let sig: Signature = sk.sign(&UID);
        let element = SoftwareElement::with_uid(UID);
        let fault = element.fault_injector();
        let config = ClientConfig::default().with_license_key(STANDARD.encode(sig.to_der()));
        let client = DeviceClient::new(Box::new(element), config)
            .unwrap()
            .with_issuer_key(pk);
        assert!(client.license_init().unwrap().is_valid());

        fault.trip();
        let err = client.random_generate(32).unwrap_err();
        assert!(matches!(err, SeError::HardwareFault(_)));
        assert!(err.is_retryable());
        assert!(!client.health_check().unwrap().element_ok);

        fault.clear();
        assert_eq!(client.random_generate(32).unwrap().len(), 32);
    }

    #[test]
    fn test_health_when_licensed() {
        let client = licensed_client();
        let report = client.health_check().unwrap();
        assert!(report.license_ok);
        assert!(report.is_operational());
    }
}
