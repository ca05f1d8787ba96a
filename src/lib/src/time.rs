//! Time sources for challenge expiry
//!
//! Devices running this client often lack a battery-backed RTC, so the
//! clock is pluggable. The authentication protocol only needs elapsed
//! seconds between issuing a challenge and receiving the response, read
//! from the same source.
//!
//! # Usage
//!
//! ```rust,ignore
//! use seclient::time::{TimeSource, SystemTimeSource, ManualTimeSource};
//!
//! let system = SystemTimeSource;
//! let now = system.now_unix()?;
//!
//! // Deterministic clock for tests and simulators
//! let clock = ManualTimeSource::new(1_750_000_000);
//! clock.advance(31);
//! ```
//!
//! # Build-time lower bound
//!
//! The binary cannot run before it was compiled. [`BUILD_TIMESTAMP`] is used
//! as a floor: a clock reading below it marks the source as unreliable.

use crate::error::SeError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix timestamp at which the library was compiled.
pub const BUILD_TIMESTAMP: u64 = {
    match option_env!("SECLIENT_BUILD_TIMESTAMP") {
        Some(s) => {
            let bytes = s.as_bytes();
            let mut result: u64 = 0;
            let mut i = 0;
            while i < bytes.len() {
                let digit = bytes[i] as u64 - b'0' as u64;
                result = result * 10 + digit;
                i += 1;
            }
            result
        }
        // 2025-01-01 00:00:00 UTC
        None => 1735689600,
    }
};

/// Pluggable clock.
///
/// # Example Implementation
///
/// ```rust,ignore
/// struct RtcTimeSource { rtc: Rtc }
///
/// impl TimeSource for RtcTimeSource {
///     fn now_unix(&self) -> Result<u64, SeError> {
///         Ok(self.rtc.read_epoch_secs()?)
///     }
///
///     fn is_reliable(&self) -> bool {
///         self.rtc.is_synchronized()
///     }
/// }
/// ```
pub trait TimeSource: Send + Sync {
    /// Current time as seconds since the Unix epoch.
    fn now_unix(&self) -> Result<u64, SeError>;

    /// Whether readings can be trusted for freshness decisions.
    fn is_reliable(&self) -> bool;

    /// Lower bound for any valid reading.
    fn minimum_unix(&self) -> u64 {
        BUILD_TIMESTAMP
    }

    /// Current time, refused when it lies below [`minimum_unix`](Self::minimum_unix).
    fn trusted_now(&self) -> Result<u64, SeError> {
        let now = self.now_unix()?;
        if now < self.minimum_unix() {
            return Err(SeError::InvalidState("clock reads earlier than its lower bound"));
        }
        Ok(now)
    }
}

/// Host clock via `std::time::SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_unix(&self) -> Result<u64, SeError> {
        Ok(SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs())
    }

    fn is_reliable(&self) -> bool {
        self.trusted_now().is_ok()
    }
}

/// Source for devices without any clock: knows only the build time.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildTimeSource;

impl TimeSource for BuildTimeSource {
    fn now_unix(&self) -> Result<u64, SeError> {
        Err(SeError::InvalidState(
            "no clock available: build time is only a lower bound",
        ))
    }

    fn is_reliable(&self) -> bool {
        false
    }
}

/// Settable clock for tests and simulators.
///
/// Can be moved backwards, which real RTCs occasionally do after a resync.
/// Has no lower bound unless one is set with [`with_floor`](Self::with_floor).
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    secs: AtomicU64,
    floor: u64,
}

impl ManualTimeSource {
    pub fn new(secs: u64) -> Self {
        Self {
            secs: AtomicU64::new(secs),
            floor: 0,
        }
    }

    pub fn with_floor(mut self, floor: u64) -> Self {
        self.floor = floor;
        self
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn rewind(&self, secs: u64) {
        let now = self.secs.load(Ordering::SeqCst);
        self.secs.store(now.saturating_sub(secs), Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_unix(&self) -> Result<u64, SeError> {
        Ok(self.secs.load(Ordering::SeqCst))
    }

    fn is_reliable(&self) -> bool {
        self.trusted_now().is_ok()
    }

    fn minimum_unix(&self) -> u64 {
        self.floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_timestamp_is_reasonable() {
        assert!(BUILD_TIMESTAMP >= 1735689600);
        assert!(BUILD_TIMESTAMP < 4102444800);
    }

    #[test]
    fn test_system_time_source() {
        let source = SystemTimeSource;
        assert!(source.now_unix().unwrap() >= source.minimum_unix());
        assert!(source.is_reliable());
        assert!(source.trusted_now().is_ok());
    }

    #[test]
    fn test_build_time_source() {
        let source = BuildTimeSource;
        assert!(source.now_unix().is_err());
        assert!(!source.is_reliable());
        assert!(source.trusted_now().is_err());
        assert_eq!(source.minimum_unix(), BUILD_TIMESTAMP);
    }

    #[test]
    fn test_floor_marks_clock_unreliable() {
        let clock = ManualTimeSource::new(BUILD_TIMESTAMP - 1).with_floor(BUILD_TIMESTAMP);
        assert!(!clock.is_reliable());
        assert!(matches!(clock.trusted_now(), Err(SeError::InvalidState(_))));
        clock.set(BUILD_TIMESTAMP);
        assert!(clock.is_reliable());
        assert_eq!(clock.trusted_now().unwrap(), BUILD_TIMESTAMP);
    }

    #[test]
    fn test_manual_time_source() {
        let clock = ManualTimeSource::new(1000);
        clock.advance(30);
        assert_eq!(clock.now_unix().unwrap(), 1030);
        clock.rewind(100);
        assert_eq!(clock.now_unix().unwrap(), 930);
        clock.rewind(10_000);
        assert_eq!(clock.now_unix().unwrap(), 0);
        clock.set(42);
        assert_eq!(clock.now_unix().unwrap(), 42);
    }
}
