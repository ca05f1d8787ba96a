//! Fuzz target for envelope framing and unpadding
//!
//! Security concerns:
//! - Panics on short or misaligned envelopes
//! - Slice arithmetic underflow when splitting IV, ciphertext and MAC
//! - Out-of-range PKCS#7 pad bytes

#![no_main]

use libfuzzer_sys::fuzz_target;
use seclient::channel::{Envelope, Padding};

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = Envelope::from_bytes(data) {
        assert_eq!(envelope.to_bytes(), data);
        assert_eq!(envelope.len(), data.len());
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = Envelope::from_base64(text);
    }

    let _ = Padding::Pkcs7.unpad(data);
    let _ = Padding::Zero.unpad(data);
});
