//! Fuzz target for peer public key parsing and signature verification
//!
//! Security concerns:
//! - Acceptance of points off the curve or the identity
//! - Panics on malformed DER signatures

#![no_main]

use libfuzzer_sys::fuzz_target;
use seclient::crypto::verify_signature;
use seclient::keys::PublicKey;

fuzz_target!(|data: &[u8]| {
    if data.len() < 65 {
        let _ = PublicKey::from_sec1_bytes(data);
        return;
    }

    let (point, rest) = data.split_at(65);
    if let Ok(key) = PublicKey::from_sec1_bytes(point) {
        assert!(key.verifying_key().is_ok());
        let _ = verify_signature(&key, b"fuzz", rest);
    }
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = PublicKey::from_hex(text);
    }
});
