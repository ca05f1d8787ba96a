//! Host-side client layer for a hardware secure element.
//!
//! Keys live inside the element and are referenced by object identifier
//! only; this crate sequences element commands, validates inputs before
//! they reach the hardware, and builds the protocols that sit on top:
//! an encrypt-then-MAC channel, challenge-response authentication,
//! counter-based replay protection and license verification.

#![forbid(unsafe_code)]

mod error;

/// Security audit logging
///
/// Structured audit events (license results, authentication outcomes,
/// tamper and replay detection, key generation) emitted through `tracing`
/// under a dedicated target.
pub mod audit;

/// Object identifiers and the typed object registry
pub mod oid;

/// Hardware boundary
///
/// The [`platform::SecureElement`] trait is the only path to the element.
/// A software implementation is provided for development and tests.
pub mod platform;

/// Exclusive, time-bounded access to the element
pub mod session;

/// Raw data object storage
pub mod store;

/// Key generation, lookup and public-key export
pub mod keys;

/// Element-backed cryptographic primitives
pub mod crypto;

/// Monotonic counters and replay protection
pub mod counter;

/// Challenge-response authentication
pub mod auth;

/// Encrypt-then-MAC secure channel
pub mod channel;

/// License verification bound to the device UID
pub mod license;

/// Element health reporting
pub mod health;

/// Client configuration
pub mod config;

/// Firmware-facing client surface
pub mod client;

/// Time validation for devices without a trusted clock
///
/// Provides time source abstraction for embedded devices that may not
/// have reliable system clocks, with a build-time lower bound.
pub mod time;

pub use client::DeviceClient;
pub use config::{ClientConfig, LicenseConfig};
pub use error::{ErrorCode, SeError};
pub use license::LicenseStatus;
pub use oid::{CounterId, DataSlot, Oid};
pub use platform::{SecureElement, SecurityLevel};
pub use session::{Session, SessionSupervisor};

pub mod reexports {
    pub use {base64, hex, log, p256, serde_json, thiserror};
}
