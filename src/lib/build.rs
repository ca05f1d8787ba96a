//! Build script for the seclient library
//!
//! Sets `SECLIENT_BUILD_TIMESTAMP` for the time module (compile-time lower
//! bound for clocks) and forwards `SECLIENT_ISSUER_KEY`, the fleet license
//! issuer public key, so it is baked into the binary rather than read at
//! runtime.

use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time before Unix epoch")
        .as_secs();

    println!("cargo::rerun-if-changed=build.rs");
    println!("cargo::rerun-if-env-changed=SECLIENT_ISSUER_KEY");
    println!("cargo::rustc-env=SECLIENT_BUILD_TIMESTAMP={}", timestamp);

    if let Ok(key) = std::env::var("SECLIENT_ISSUER_KEY") {
        let key = key.trim();
        if key.len() != 130 || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
            panic!("SECLIENT_ISSUER_KEY must be a 65-byte uncompressed P-256 point in hex");
        }
        println!("cargo::rustc-env=SECLIENT_ISSUER_KEY={}", key);
    }
}
