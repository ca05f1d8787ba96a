//! Cryptographic operations executed by the secure element.
//!
//! Every function takes the open [`Session`] and validates its inputs first,
//! so caller errors never cost a hardware transaction. Three failure classes
//! stay distinct: hardware faults, caller errors and verification failures.

use crate::error::SeError;
use crate::keys::{KeyAlgorithm, KeyHandle, PublicKey};
use crate::oid::{self, Oid};
use crate::platform::{Ikm, PublicKeyBytes};
use crate::session::Session;
use p256::ecdsa::{signature::Verifier, DerSignature};

pub const AES_BLOCK_SIZE: usize = 16;
pub const IV_SIZE: usize = 16;

/// Per-call bounds of the hardware RNG.
pub const RANDOM_MIN: usize = 8;
pub const RANDOM_MAX: usize = 256;

/// HKDF-SHA256 output bound (255 * hash length).
pub const HKDF_MAX_OUTPUT: usize = 255 * 32;

/// Signature algorithm identifier carried in wire messages.
pub const SIG_ALG: &str = "ECDSA-P256-SHA256";

/// Fill a fresh buffer of `len` bytes from the hardware RNG.
pub fn random_bytes(session: &mut Session<'_>, len: usize) -> Result<Vec<u8>, SeError> {
    if !(RANDOM_MIN..=RANDOM_MAX).contains(&len) {
        return Err(SeError::InvalidLength(format!(
            "random length must be {}-{} bytes, got {}",
            RANDOM_MIN, RANDOM_MAX, len
        )));
    }
    let mut out = vec![0u8; len];
    session.element().random(&mut out)?;
    Ok(out)
}

/// Draw a fresh 16-byte IV.
pub fn random_iv(session: &mut Session<'_>) -> Result<[u8; IV_SIZE], SeError> {
    let mut iv = [0u8; IV_SIZE];
    session.element().random(&mut iv)?;
    Ok(iv)
}

fn check_blocks(data: &[u8], what: &str) -> Result<(), SeError> {
    if data.is_empty() || data.len() % AES_BLOCK_SIZE != 0 {
        return Err(SeError::InvalidLength(format!(
            "{} must be a non-empty multiple of {} bytes, got {}",
            what,
            AES_BLOCK_SIZE,
            data.len()
        )));
    }
    Ok(())
}

/// AES-CBC encrypt `plaintext` (already padded to the block size).
///
/// A random IV is drawn when `iv` is `None`. Returns `(iv, ciphertext)`.
pub fn aes_encrypt(
    session: &mut Session<'_>,
    key: &KeyHandle,
    plaintext: &[u8],
    iv: Option<[u8; IV_SIZE]>,
) -> Result<([u8; IV_SIZE], Vec<u8>), SeError> {
    key.require(KeyAlgorithm::Aes)?;
    check_blocks(plaintext, "plaintext")?;

    let iv = match iv {
        Some(iv) => iv,
        None => random_iv(session)?,
    };
    let ciphertext = session.element().aes_cbc_encrypt(key.oid(), &iv, plaintext)?;
    Ok((iv, ciphertext))
}

/// AES-CBC decrypt. Provides confidentiality only: authenticate first.
pub fn aes_decrypt(
    session: &mut Session<'_>,
    key: &KeyHandle,
    iv: &[u8; IV_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, SeError> {
    key.require(KeyAlgorithm::Aes)?;
    check_blocks(ciphertext, "ciphertext")?;
    session.element().aes_cbc_decrypt(key.oid(), iv, ciphertext)
}

pub fn hmac_sha256(
    session: &mut Session<'_>,
    key: &KeyHandle,
    data: &[u8],
) -> Result<[u8; 32], SeError> {
    key.require(KeyAlgorithm::HmacSha256)?;
    session.element().hmac_sha256(key.oid(), data)
}

/// SHA-256 the data, then sign the digest with the ECC key. DER output.
pub fn sign_data(
    session: &mut Session<'_>,
    key: &KeyHandle,
    data: &[u8],
) -> Result<Vec<u8>, SeError> {
    key.require(KeyAlgorithm::EcdsaP256)?;
    let digest = session.element().sha256(data)?;
    session.element().sign_digest(key.oid(), &digest)
}

/// ECDH between the element-held key and a peer's uncompressed point.
pub fn ecdh_shared_secret(
    session: &mut Session<'_>,
    key: &KeyHandle,
    peer_public: &[u8],
) -> Result<[u8; 32], SeError> {
    key.require(KeyAlgorithm::EcdsaP256)?;
    let peer: PublicKeyBytes = peer_public.try_into().map_err(|_| {
        SeError::InvalidLength(format!(
            "peer public key must be 65 bytes, got {}",
            peer_public.len()
        ))
    })?;
    if peer[0] != 0x04 {
        return Err(SeError::InvalidParameter(
            "peer public key must be uncompressed (0x04 prefix)".into(),
        ));
    }
    session.element().ecdh(key.oid(), &peer)
}

/// Input keying material for [`hkdf_derive`].
#[derive(Debug, Clone, Copy)]
pub enum KeyMaterial<'a> {
    /// Secret held in an HMAC-range data slot
    Stored(Oid),
    /// Caller-provided bytes, e.g. an ECDH shared secret
    Bytes(&'a [u8]),
}

/// HKDF-SHA256 expand to `out_len` bytes (1..=8160).
pub fn hkdf_derive(
    session: &mut Session<'_>,
    ikm: KeyMaterial<'_>,
    salt: &[u8],
    info: &[u8],
    out_len: usize,
) -> Result<Vec<u8>, SeError> {
    if out_len == 0 || out_len > HKDF_MAX_OUTPUT {
        return Err(SeError::InvalidLength(format!(
            "HKDF output must be 1-{} bytes, got {}",
            HKDF_MAX_OUTPUT, out_len
        )));
    }
    let ikm = match ikm {
        KeyMaterial::Stored(oid) => {
            oid::lookup(oid)?;
            if !oid::is_hmac_slot(oid) {
                return Err(SeError::AccessDenied(format!(
                    "{} cannot be used as HKDF input",
                    oid
                )));
            }
            Ikm::Object(oid)
        }
        KeyMaterial::Bytes(bytes) => {
            if bytes.is_empty() {
                return Err(SeError::InvalidParameter("empty HKDF input key".into()));
            }
            Ikm::Bytes(bytes)
        }
    };

    let mut out = vec![0u8; out_len];
    session.element().hkdf_sha256(ikm, salt, info, &mut out)?;
    Ok(out)
}

pub fn hash(session: &mut Session<'_>, data: &[u8]) -> Result<[u8; 32], SeError> {
    session.element().sha256(data)
}

/// Verify a DER ECDSA P-256/SHA-256 signature on the host.
///
/// Fails closed: any malformed input is a verification failure.
pub fn verify_signature(public_key: &PublicKey, data: &[u8], der_sig: &[u8]) -> Result<(), SeError> {
    let vk = public_key.verifying_key()?;
    let sig = DerSignature::try_from(der_sig).map_err(|_| SeError::VerificationFailed)?;
    vk.verify(data, &sig).map_err(|_| SeError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{self, EccCurve};
    use crate::oid::{AES_KEY, APP_KEY, DEVICE_KEY};
    use crate::platform::software::SoftwareElement;
    use crate::session::SessionSupervisor;

    fn supervisor() -> SessionSupervisor {
        SessionSupervisor::new(Box::new(SoftwareElement::new()))
    }

    #[test]
    fn test_random_bounds() {
        let sup = supervisor();
        let mut session = sup.acquire().unwrap();
        assert_eq!(random_bytes(&mut session, 8).unwrap().len(), 8);
        assert_eq!(random_bytes(&mut session, 256).unwrap().len(), 256);
        assert!(matches!(
            random_bytes(&mut session, 7),
            Err(SeError::InvalidLength(_))
        ));
        assert!(matches!(
            random_bytes(&mut session, 257),
            Err(SeError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_random_is_not_repeated() {
        let sup = supervisor();
        let mut session = sup.acquire().unwrap();
        let a = random_bytes(&mut session, 32).unwrap();
        let b = random_bytes(&mut session, 32).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_aes_round_trip() {
        let sup = supervisor();
        let mut session = sup.acquire().unwrap();
        let key = keys::generate_symmetric_key(&mut session, AES_KEY, 256).unwrap();

        let plaintext = b"sixteen byte blk sixteen byte blk";
        let padded = &plaintext[..32];
        let (iv, ct) = aes_encrypt(&mut session, &key, padded, None).unwrap();
        let pt = aes_decrypt(&mut session, &key, &iv, &ct).unwrap();
        assert_eq!(pt.as_slice(), padded);
    }

    #[test]
    fn test_aes_explicit_iv_is_deterministic() {
        let sup = supervisor();
        let mut session = sup.acquire().unwrap();
        let key = keys::generate_symmetric_key(&mut session, AES_KEY, 128).unwrap();
        let iv = [9u8; 16];
        let (_, a) = aes_encrypt(&mut session, &key, &[1u8; 16], Some(iv)).unwrap();
        let (_, b) = aes_encrypt(&mut session, &key, &[1u8; 16], Some(iv)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_aes_rejects_unaligned() {
        let sup = supervisor();
        let mut session = sup.acquire().unwrap();
        let key = keys::generate_symmetric_key(&mut session, AES_KEY, 256).unwrap();
        assert!(matches!(
            aes_encrypt(&mut session, &key, &[0u8; 15], None),
            Err(SeError::InvalidLength(_))
        ));
        assert!(matches!(
            aes_encrypt(&mut session, &key, &[], None),
            Err(SeError::InvalidLength(_))
        ));
        assert!(matches!(
            aes_decrypt(&mut session, &key, &[0u8; 16], &[0u8; 17]),
            Err(SeError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_hmac_deterministic() {
        let sup = supervisor();
        let mut session = sup.acquire().unwrap();
        let key = keys::generate_hmac_key(&mut session, Oid(0xF1D5)).unwrap();
        let a = hmac_sha256(&mut session, &key, b"telemetry").unwrap();
        let b = hmac_sha256(&mut session, &key, b"telemetry").unwrap();
        let c = hmac_sha256(&mut session, &key, b"telemetrz").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_wrong_algorithm_handle() {
        let sup = supervisor();
        let mut session = sup.acquire().unwrap();
        let aes = keys::generate_symmetric_key(&mut session, AES_KEY, 256).unwrap();
        assert!(matches!(
            hmac_sha256(&mut session, &aes, b"x"),
            Err(SeError::InvalidParameter(_))
        ));
        assert!(matches!(
            sign_data(&mut session, &aes, b"x"),
            Err(SeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_sign_and_verify() {
        let sup = supervisor();
        let mut session = sup.acquire().unwrap();
        let (key, public) =
            keys::generate_asymmetric_keypair(&mut session, DEVICE_KEY, EccCurve::NistP256)
                .unwrap();
        let sig = sign_data(&mut session, &key, b"firmware manifest").unwrap();
        assert!(verify_signature(&public, b"firmware manifest", &sig).is_ok());
        assert!(matches!(
            verify_signature(&public, b"firmware manifesT", &sig),
            Err(SeError::VerificationFailed)
        ));
        assert!(matches!(
            verify_signature(&public, b"firmware manifest", &[0x30, 0x00]),
            Err(SeError::VerificationFailed)
        ));
    }

    #[test]
    fn test_ecdh_then_hkdf() {
        let sup = supervisor();
        let mut session = sup.acquire().unwrap();
        let (a, a_pub) =
            keys::generate_asymmetric_keypair(&mut session, DEVICE_KEY, EccCurve::NistP256)
                .unwrap();
        let (b, b_pub) =
            keys::generate_asymmetric_keypair(&mut session, APP_KEY, EccCurve::NistP256).unwrap();

        let s1 = ecdh_shared_secret(&mut session, &a, b_pub.as_bytes()).unwrap();
        let s2 = ecdh_shared_secret(&mut session, &b, a_pub.as_bytes()).unwrap();
        assert_eq!(s1, s2);

        let k1 = hkdf_derive(
            &mut session,
            KeyMaterial::Bytes(&s1),
            b"salt",
            b"TESAIoT-D2D-AES256",
            32,
        )
        .unwrap();
        let k2 = hkdf_derive(
            &mut session,
            KeyMaterial::Bytes(&s2),
            b"salt",
            b"TESAIoT-D2D-AES256",
            32,
        )
        .unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 32);
    }

    #[test]
    fn test_ecdh_rejects_short_key() {
        let sup = supervisor();
        let mut session = sup.acquire().unwrap();
        let (a, _) =
            keys::generate_asymmetric_keypair(&mut session, DEVICE_KEY, EccCurve::NistP256)
                .unwrap();
        assert!(matches!(
            ecdh_shared_secret(&mut session, &a, &[0x04; 33]),
            Err(SeError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_hkdf_rfc5869_case1() {
        let sup = supervisor();
        let mut session = sup.acquire().unwrap();
        let ikm = [0x0bu8; 22];
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();
        let okm = hkdf_derive(&mut session, KeyMaterial::Bytes(&ikm), &salt, &info, 42).unwrap();
        assert_eq!(
            hex::encode(okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn test_hkdf_bounds_and_stored_ikm() {
        let sup = supervisor();
        let mut session = sup.acquire().unwrap();
        assert!(matches!(
            hkdf_derive(&mut session, KeyMaterial::Bytes(b"k"), b"", b"", 0),
            Err(SeError::InvalidLength(_))
        ));
        assert!(matches!(
            hkdf_derive(&mut session, KeyMaterial::Bytes(b"k"), b"", b"", 8161),
            Err(SeError::InvalidLength(_))
        ));
        assert!(matches!(
            hkdf_derive(&mut session, KeyMaterial::Stored(AES_KEY), b"", b"", 32),
            Err(SeError::AccessDenied(_))
        ));

        keys::generate_hmac_key(&mut session, Oid(0xF1D7)).unwrap();
        let okm =
            hkdf_derive(&mut session, KeyMaterial::Stored(Oid(0xF1D7)), b"", b"ctx", 64).unwrap();
        assert_eq!(okm.len(), 64);
    }

    #[test]
    fn test_hash_known_answer() {
        let sup = supervisor();
        let mut session = sup.acquire().unwrap();
        assert_eq!(
            hex::encode(hash(&mut session, b"abc").unwrap()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hardware_fault_is_surfaced() {
        let element = SoftwareElement::new();
        let faults = element.fault_injector();
        let sup = SessionSupervisor::new(Box::new(element));
        let mut session = sup.acquire().unwrap();
        faults.trip();
        assert!(matches!(
            random_bytes(&mut session, 16),
            Err(SeError::HardwareFault(_))
        ));
        // caller errors still win over faults
        assert!(matches!(
            random_bytes(&mut session, 4),
            Err(SeError::InvalidLength(_))
        ));
    }
}
