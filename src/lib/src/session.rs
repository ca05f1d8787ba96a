//! Exclusive access to the secure element.
//!
//! The element executes one command sequence at a time. [`SessionSupervisor`]
//! owns it behind a single mutex and hands out [`Session`] guards; every
//! operation in this crate takes `&mut Session`, so two sessions can never
//! interleave commands, and a session is released on every exit path when
//! the guard drops.

use crate::error::SeError;
use crate::platform::{SecureElement, SecurityLevel};
use parking_lot::{Mutex, MutexGuard};
use std::time::Duration;

/// Default bound on waiting for the element.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Owner of the single physical secure element.
pub struct SessionSupervisor {
    element: Mutex<Box<dyn SecureElement>>,
    timeout: Duration,
}

impl SessionSupervisor {
    pub fn new(element: Box<dyn SecureElement>) -> Self {
        log::info!(
            "Secure element supervisor started: {} ({})",
            element.name(),
            element.security_level()
        );
        SessionSupervisor {
            element: Mutex::new(element),
            timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the element, waiting at most the configured timeout.
    pub fn acquire(&self) -> Result<Session<'_>, SeError> {
        self.acquire_timeout(self.timeout)
    }

    /// Acquire the element, waiting at most `timeout`.
    ///
    /// Fails with [`SeError::Busy`] if another session is still open.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Session<'_>, SeError> {
        match self.element.try_lock_for(timeout) {
            Some(guard) => {
                log::trace!("session acquired");
                Ok(Session { guard })
            }
            None => {
                log::warn!(
                    "secure element busy, gave up after {} ms",
                    timeout.as_millis()
                );
                Err(SeError::Busy(timeout.as_millis() as u64))
            }
        }
    }

    /// Acquire the element only if it is free right now.
    pub fn try_acquire(&self) -> Result<Session<'_>, SeError> {
        self.element
            .try_lock()
            .map(|guard| Session { guard })
            .ok_or(SeError::Busy(0))
    }

    /// Whether a session is currently open.
    pub fn is_busy(&self) -> bool {
        self.element.is_locked()
    }
}

/// An open session on the secure element.
///
/// Dropping the session releases the element.
pub struct Session<'a> {
    guard: MutexGuard<'a, Box<dyn SecureElement>>,
}

impl<'a> Session<'a> {
    /// Release the element explicitly.
    pub fn release(self) {
        drop(self);
    }

    pub fn element_name(&self) -> &str {
        self.guard.name()
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.guard.security_level()
    }

    /// Raw element access for the operation modules in this crate.
    pub(crate) fn element(&mut self) -> &mut dyn SecureElement {
        &mut **self.guard
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        log::trace!("session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::software::SoftwareElement;
    use std::sync::Arc;
    use std::thread;

    fn supervisor() -> SessionSupervisor {
        SessionSupervisor::new(Box::new(SoftwareElement::new()))
    }

    #[test]
    fn test_single_session() {
        let sup = supervisor();
        let session = sup.acquire().expect("first session");
        assert!(sup.is_busy());
        assert!(matches!(sup.try_acquire(), Err(SeError::Busy(0))));
        session.release();
        assert!(!sup.is_busy());
        assert!(sup.try_acquire().is_ok());
    }

    #[test]
    fn test_acquire_times_out() {
        let sup = supervisor();
        let _held = sup.acquire().unwrap();
        let result = sup.acquire_timeout(Duration::from_millis(20));
        assert!(matches!(result, Err(SeError::Busy(20))));
        assert!(result.err().map(|e| e.is_retryable()).unwrap_or(false));
    }

    #[test]
    fn test_released_on_error_path() {
        let sup = supervisor();
        let failing = |sup: &SessionSupervisor| -> Result<(), SeError> {
            let _session = sup.acquire()?;
            Err(SeError::VerificationFailed)
        };
        assert!(failing(&sup).is_err());
        assert!(!sup.is_busy());
    }

    #[test]
    fn test_concurrent_sessions_are_serialized() {
        let sup = Arc::new(supervisor());
        let mut workers = vec![];

        for _ in 0..8 {
            let sup = Arc::clone(&sup);
            workers.push(thread::spawn(move || {
                let mut session = sup.acquire().expect("acquire");
                session.element().probe().expect("probe");
            }));
        }

        for worker in workers {
            worker.join().expect("Thread panicked");
        }
        assert!(!sup.is_busy());
    }
}
