//! Fuzz target for the JSON messages a device receives
//!
//! Challenges, responses, counted messages, persisted replay windows and
//! client configuration all arrive from outside the trust boundary.

#![no_main]

use libfuzzer_sys::fuzz_target;
use seclient::auth::{ChallengeMessage, ResponseMessage};
use seclient::counter::{CountedMessage, ReplayGuard};
use seclient::ClientConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(challenge) = ChallengeMessage::from_json(text) {
        let _ = challenge.nonce_bytes();
    }
    let _ = ResponseMessage::from_json(text);
    if let Ok(message) = CountedMessage::from_json(text) {
        let _ = CountedMessage::signed_bytes(message.counter, &message.data);
    }
    if let Ok(guard) = ReplayGuard::from_json(text) {
        let _ = guard.check("peer", 0);
    }
    let _ = ClientConfig::from_json(text);
});
