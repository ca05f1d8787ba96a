//! Security audit events for secure element operations.
//!
//! Operational chatter goes through the `log` facade. Events a fleet operator
//! must be able to reconstruct after the fact (license decisions,
//! authentication outcomes, tamper and replay rejections, counter exhaustion,
//! key generation) are emitted here as structured `tracing` events under the
//! `seclient::audit` target.
//!
//! # Usage
//!
//! ```rust,ignore
//! use seclient::audit::{self, AuditConfig, LogDestination};
//!
//! audit::init(AuditConfig {
//!     destination: LogDestination::Stdout,
//!     ..AuditConfig::default()
//! })?;
//! ```
//!
//! # Event Types
//!
//! - `license.verified` / `license.rejected`
//! - `auth.authenticated` / `auth.rejected`
//! - `channel.tampered`
//! - `counter.replay` / `counter.overflow`
//! - `key.generated`
//! - `element.fault`
//!
//! # JSON Output Example
//!
//! ```json
//! {
//!   "timestamp": "2026-03-14T09:12:44Z",
//!   "level": "WARN",
//!   "target": "seclient::audit",
//!   "event_type": "counter.replay",
//!   "peer": "gateway-7",
//!   "received": 41,
//!   "last_accepted": 42
//! }
//! ```

use crate::error::SeError;
use crate::oid::Oid;
use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

/// Target used by every audit event.
pub const AUDIT_TARGET: &str = "seclient::audit";

static AUDIT_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Audit log configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Enable audit logging (default: true)
    pub enabled: bool,
    pub destination: LogDestination,
    /// Use JSON format (default: true)
    pub json_format: bool,
    /// Shorten device UIDs to their first bytes (default: true)
    pub redact_uid: bool,
    /// Filter directive (default: "seclient::audit=info")
    pub filter: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            destination: LogDestination::Stderr,
            json_format: true,
            redact_uid: true,
            filter: format!("{}=info", AUDIT_TARGET),
        }
    }
}

/// Audit log destination
#[derive(Debug, Clone, Default)]
pub enum LogDestination {
    Stdout,
    #[default]
    Stderr,
    /// Append to a file (path)
    File(String),
}

static REDACT_UID: OnceLock<bool> = OnceLock::new();

/// Initialize the audit subscriber.
///
/// Call once at startup. Later calls, or a subscriber installed elsewhere,
/// leave the existing one in place.
pub fn init(config: AuditConfig) -> Result<(), SeError> {
    if AUDIT_INITIALIZED.get().is_some() {
        return Ok(());
    }
    let _ = REDACT_UID.set(config.redact_uid);

    if !config.enabled {
        let _ = AUDIT_INITIALIZED.set(true);
        return Ok(());
    }

    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match config.destination {
        LogDestination::Stdout => {
            if config.json_format {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_span_events(FmtSpan::NONE)
                            .with_writer(std::io::stdout),
                    )
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().with_target(true).with_writer(std::io::stdout))
                    .try_init()
            }
        }
        LogDestination::Stderr => {
            if config.json_format {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_span_events(FmtSpan::NONE)
                            .with_writer(std::io::stderr),
                    )
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                    .try_init()
            }
        }
        LogDestination::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| {
                    SeError::InvalidParameter(format!("audit log file {}: {}", path, e))
                })?;

            if config.json_format {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_span_events(FmtSpan::NONE)
                            .with_writer(std::sync::Mutex::new(file)),
                    )
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .with_target(true)
                            .with_writer(std::sync::Mutex::new(file)),
                    )
                    .try_init()
            }
        }
    };

    if let Err(e) = installed {
        log::debug!("audit subscriber not installed: {}", e);
    }

    let _ = AUDIT_INITIALIZED.set(true);
    Ok(())
}

/// Shorten a hex device UID for logs.
///
/// "e0c2a1b2c3d4..." becomes "e0c2a1b2***".
pub fn redact_uid(uid_hex: &str) -> String {
    if !REDACT_UID.get().copied().unwrap_or(true) {
        return uid_hex.to_string();
    }
    let visible: String = uid_hex.chars().take(8).collect();
    format!("{}***", visible)
}

// ============================================================================
// Audit Event Functions
// ============================================================================

pub fn log_license_result(uid_hex: Option<&str>, status: &str) {
    let uid_display = uid_hex
        .map(redact_uid)
        .unwrap_or_else(|| "unknown".to_string());

    if status == "valid" {
        tracing::info!(
            target: AUDIT_TARGET,
            event_type = "license.verified",
            device_uid = %uid_display,
            status = status,
            "License verified"
        );
    } else {
        tracing::warn!(
            target: AUDIT_TARGET,
            event_type = "license.rejected",
            device_uid = %uid_display,
            status = status,
            "License rejected, client operations disabled"
        );
    }
}

pub fn log_auth_outcome(nonce_hex: &str, authenticated: bool, reason: Option<&str>) {
    let nonce_prefix = &nonce_hex[..std::cmp::min(8, nonce_hex.len())];
    if authenticated {
        tracing::info!(
            target: AUDIT_TARGET,
            event_type = "auth.authenticated",
            nonce = nonce_prefix,
            "Peer authenticated"
        );
    } else {
        tracing::warn!(
            target: AUDIT_TARGET,
            event_type = "auth.rejected",
            nonce = nonce_prefix,
            reason = reason.unwrap_or("unspecified"),
            "Peer authentication rejected"
        );
    }
}

pub fn log_tamper_detected(envelope_len: usize) {
    tracing::warn!(
        target: AUDIT_TARGET,
        event_type = "channel.tampered",
        envelope_len = envelope_len,
        "Envelope MAC mismatch, message discarded before decryption"
    );
}

pub fn log_replay_rejected(peer: &str, received: u32, last_accepted: u32) {
    tracing::warn!(
        target: AUDIT_TARGET,
        event_type = "counter.replay",
        peer = peer,
        received = received,
        last_accepted = last_accepted,
        "Replayed message rejected"
    );
}

pub fn log_counter_overflow(oid: Oid) {
    tracing::error!(
        target: AUDIT_TARGET,
        event_type = "counter.overflow",
        oid = %oid,
        "Monotonic counter exhausted"
    );
}

pub fn log_key_generated(oid: Oid, key_type: &str, bits: u16) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "key.generated",
        oid = %oid,
        key_type = key_type,
        bits = bits,
        "Key generated inside secure element"
    );
}

pub fn log_element_fault(operation: &str, error_message: &str) {
    let safe_message = sanitize_error_message(error_message);
    tracing::error!(
        target: AUDIT_TARGET,
        event_type = "element.fault",
        operation = operation,
        error_message = %safe_message,
        "Secure element fault"
    );
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Keep long hex blobs (key material, signatures) out of audit records.
fn sanitize_error_message(message: &str) -> String {
    let sanitized = message
        .split_whitespace()
        .map(|word| {
            if word.len() > 40 && word.chars().all(|c| c.is_ascii_hexdigit()) {
                "[REDACTED]"
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    if sanitized.len() > 500 {
        let mut end = 497;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &sanitized[..end])
    } else {
        sanitized
    }
}
