//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use seclient::keys::{EccCurve, PublicKey};
use seclient::oid::DEVICE_UID_LEN;
use seclient::platform::software::SoftwareElement;
use seclient::platform::{Ikm, KeyInfo, LifecycleState, PublicKeyBytes, SecureElement, SecurityLevel};
use seclient::{ClientConfig, DeviceClient, LicenseStatus, Oid, SeError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const ISSUER_SECRET: [u8; 32] = [0x11; 32];

pub fn issuer() -> (SigningKey, PublicKey) {
    let sk = SigningKey::from_slice(&ISSUER_SECRET).expect("issuer key");
    let point = sk.verifying_key().to_encoded_point(false);
    let pk = PublicKey::from_sec1_bytes(point.as_bytes()).expect("issuer public key");
    (sk, pk)
}

pub fn uid(tag: u8) -> [u8; DEVICE_UID_LEN] {
    let mut uid = [0u8; DEVICE_UID_LEN];
    uid[0] = 0xCD;
    uid[1] = 0x16;
    uid[DEVICE_UID_LEN - 1] = tag;
    uid
}

/// Base64 DER license for `uid`, signed by `sk`.
pub fn license_for(sk: &SigningKey, uid: &[u8]) -> String {
    let sig: Signature = sk.sign(uid);
    STANDARD.encode(sig.to_der().as_bytes())
}

/// Build a client over `element` and run the license check with the test issuer.
pub fn licensed_client(
    element: Box<dyn SecureElement>,
    uid: &[u8],
    config: ClientConfig,
) -> DeviceClient {
    let (sk, pk) = issuer();
    let config = config.with_license_key(license_for(&sk, uid));
    let client = DeviceClient::new(element, config)
        .expect("client")
        .with_issuer_key(pk);
    assert_eq!(client.license_init().expect("license check"), LicenseStatus::Valid);
    client
}

/// Element wrapper that counts decrypt commands.
pub struct CountingElement {
    inner: SoftwareElement,
    decrypts: Arc<AtomicUsize>,
}

impl CountingElement {
    pub fn new(inner: SoftwareElement) -> (Self, Arc<AtomicUsize>) {
        let decrypts = Arc::new(AtomicUsize::new(0));
        (
            CountingElement {
                inner,
                decrypts: Arc::clone(&decrypts),
            },
            decrypts,
        )
    }
}

pub fn decrypt_count(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

impl SecureElement for CountingElement {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn security_level(&self) -> SecurityLevel {
        self.inner.security_level()
    }

    fn probe(&mut self) -> Result<(), SeError> {
        self.inner.probe()
    }

    fn lifecycle_state(&mut self) -> Result<LifecycleState, SeError> {
        self.inner.lifecycle_state()
    }

    fn read_object(&mut self, oid: Oid) -> Result<Vec<u8>, SeError> {
        self.inner.read_object(oid)
    }

    fn write_object(&mut self, oid: Oid, data: &[u8]) -> Result<(), SeError> {
        self.inner.write_object(oid, data)
    }

    fn write_secret(&mut self, oid: Oid, secret: &[u8]) -> Result<(), SeError> {
        self.inner.write_secret(oid, secret)
    }

    fn generate_symmetric_key(&mut self, oid: Oid, bits: u16) -> Result<(), SeError> {
        self.inner.generate_symmetric_key(oid, bits)
    }

    fn generate_keypair(&mut self, oid: Oid, curve: EccCurve) -> Result<PublicKeyBytes, SeError> {
        self.inner.generate_keypair(oid, curve)
    }

    fn key_info(&mut self, oid: Oid) -> Result<KeyInfo, SeError> {
        self.inner.key_info(oid)
    }

    fn public_key(&mut self, oid: Oid) -> Result<PublicKeyBytes, SeError> {
        self.inner.public_key(oid)
    }

    fn random(&mut self, buf: &mut [u8]) -> Result<(), SeError> {
        self.inner.random(buf)
    }

    fn aes_cbc_encrypt(&mut self, oid: Oid, iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, SeError> {
        self.inner.aes_cbc_encrypt(oid, iv, data)
    }

    fn aes_cbc_decrypt(&mut self, oid: Oid, iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, SeError> {
        self.decrypts.fetch_add(1, Ordering::SeqCst);
        self.inner.aes_cbc_decrypt(oid, iv, data)
    }

    fn hmac_sha256(&mut self, oid: Oid, data: &[u8]) -> Result<[u8; 32], SeError> {
        self.inner.hmac_sha256(oid, data)
    }

    fn sign_digest(&mut self, oid: Oid, digest: &[u8; 32]) -> Result<Vec<u8>, SeError> {
        self.inner.sign_digest(oid, digest)
    }

    fn ecdh(&mut self, oid: Oid, peer: &PublicKeyBytes) -> Result<[u8; 32], SeError> {
        self.inner.ecdh(oid, peer)
    }

    fn hkdf_sha256(
        &mut self,
        ikm: Ikm<'_>,
        salt: &[u8],
        info: &[u8],
        out: &mut [u8],
    ) -> Result<(), SeError> {
        self.inner.hkdf_sha256(ikm, salt, info, out)
    }

    fn sha256(&mut self, data: &[u8]) -> Result<[u8; 32], SeError> {
        self.inner.sha256(data)
    }

    fn counter_read(&mut self, oid: Oid) -> Result<u32, SeError> {
        self.inner.counter_read(oid)
    }

    fn counter_increment(&mut self, oid: Oid, step: u32) -> Result<u32, SeError> {
        self.inner.counter_increment(oid, step)
    }
}
