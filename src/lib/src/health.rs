//! Element health checks.

use crate::counter;
use crate::error::SeError;
use crate::license::LicenseStatus;
use crate::oid::{CounterId, Oid, CERT_MAX, DEVICE_CERT, FACTORY_CERT};
use crate::platform::{LifecycleState, SecurityLevel};
use crate::session::Session;
use crate::store;
use crate::time::TimeSource;
use serde::Serialize;
use std::fmt;
use x509_parser::prelude::{FromDer, X509Certificate};

const SECS_PER_DAY: i64 = 86_400;

/// Validity window of a stored X.509 certificate, in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertValidity {
    pub not_before: i64,
    pub not_after: i64,
}

impl CertValidity {
    /// Parse the validity window out of a DER certificate. Trailing bytes
    /// after the certificate, as left by fixed-size slots, are ignored.
    pub fn from_der(der: &[u8]) -> Result<Self, SeError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| SeError::Malformed(format!("certificate: {:?}", e)))?;
        let validity = cert.validity();
        Ok(CertValidity {
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
        })
    }

    pub fn is_valid_at(&self, now: u64) -> bool {
        let now = now as i64;
        self.not_before <= now && now <= self.not_after
    }

    /// Whole days until `not_after`; 0 once expired.
    pub fn days_left(&self, now: u64) -> u32 {
        let remaining = self.not_after - now as i64;
        if remaining <= 0 {
            0
        } else {
            u32::try_from(remaining / SECS_PER_DAY).unwrap_or(u32::MAX)
        }
    }
}

/// Snapshot of the element and client state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub element_ok: bool,
    pub license_ok: bool,
    pub factory_cert_present: bool,
    pub device_cert_present: bool,
    /// Parses, and lies inside its validity window when the clock can be trusted
    pub factory_cert_ok: bool,
    pub device_cert_ok: bool,
    /// Days until the device certificate expires; `None` without a parsable
    /// certificate or a trusted clock
    pub cert_days_left: Option<u32>,
    /// `None` when the element did not answer
    #[serde(serialize_with = "serialize_lifecycle")]
    pub lifecycle: Option<LifecycleState>,
    pub boot_counter: Option<u32>,
    pub time_reliable: bool,
    #[serde(serialize_with = "serialize_display")]
    pub security_level: SecurityLevel,
}

fn serialize_lifecycle<S: serde::Serializer>(
    state: &Option<LifecycleState>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match state {
        Some(state) => s.serialize_some(&state.to_string()),
        None => s.serialize_none(),
    }
}

fn serialize_display<S: serde::Serializer>(level: &SecurityLevel, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(level)
}

impl HealthReport {
    /// Element answering, licensed, and in the operational lifecycle state.
    pub fn is_operational(&self) -> bool {
        self.element_ok && self.license_ok && self.lifecycle == Some(LifecycleState::Operational)
    }

    pub fn to_json(&self) -> Result<String, SeError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        writeln!(f, "element:       {}", if self.element_ok { "ok" } else { "FAULT" })?;
        writeln!(f, "security:      {}", self.security_level)?;
        match self.lifecycle {
            Some(state) => writeln!(f, "lifecycle:     {}", state)?,
            None => writeln!(f, "lifecycle:     unknown")?,
        }
        writeln!(f, "licensed:      {}", yes_no(self.license_ok))?;
        writeln!(f, "factory cert:  {}", yes_no(self.factory_cert_present))?;
        writeln!(f, "device cert:   {}", yes_no(self.device_cert_present))?;
        writeln!(f, "factory valid: {}", yes_no(self.factory_cert_ok))?;
        writeln!(f, "device valid:  {}", yes_no(self.device_cert_ok))?;
        match self.cert_days_left {
            Some(days) => writeln!(f, "cert expiry:   {} days", days)?,
            None => writeln!(f, "cert expiry:   unknown")?,
        }
        match self.boot_counter {
            Some(n) => writeln!(f, "boot counter:  {}", n)?,
            None => writeln!(f, "boot counter:  unavailable")?,
        }
        write!(f, "reliable time: {}", yes_no(self.time_reliable))
    }
}

/// Probe the element and collect a [`HealthReport`].
///
/// Individual read failures are folded into the report instead of aborting
/// the check.
pub fn health_check(
    session: &mut Session<'_>,
    license: LicenseStatus,
    clock: &dyn TimeSource,
) -> HealthReport {
    let security_level = session.security_level();
    let element_ok = match session.element().probe() {
        Ok(()) => true,
        Err(e) => {
            log::warn!("element probe failed: {}", e);
            false
        }
    };

    let lifecycle = if element_ok {
        session.element().lifecycle_state().ok()
    } else {
        None
    };
    let now = clock.trusted_now().ok();
    let factory_cert = if element_ok { read_cert(session, FACTORY_CERT) } else { None };
    let device_cert = if element_ok { read_cert(session, DEVICE_CERT) } else { None };
    let factory_validity = factory_cert.as_deref().and_then(parse_validity);
    let device_validity = device_cert.as_deref().and_then(parse_validity);
    let boot_counter = if element_ok {
        CounterId::BOOT
            .to_oid()
            .and_then(|oid| counter::read_counter(session, oid))
            .ok()
    } else {
        None
    };

    let report = HealthReport {
        element_ok,
        license_ok: license.is_valid(),
        factory_cert_present: factory_cert.is_some(),
        device_cert_present: device_cert.is_some(),
        factory_cert_ok: cert_ok(factory_validity, now),
        device_cert_ok: cert_ok(device_validity, now),
        cert_days_left: device_validity.zip(now).map(|(v, now)| v.days_left(now)),
        lifecycle,
        boot_counter,
        time_reliable: clock.is_reliable(),
        security_level,
    };
    log::debug!("health check: operational={}", report.is_operational());
    report
}

fn read_cert(session: &mut Session<'_>, oid: Oid) -> Option<Vec<u8>> {
    match store::read(session, oid, CERT_MAX) {
        Ok(der) if !der.is_empty() => Some(der),
        _ => None,
    }
}

fn parse_validity(der: &[u8]) -> Option<CertValidity> {
    match CertValidity::from_der(der) {
        Ok(validity) => Some(validity),
        Err(e) => {
            log::warn!("unreadable certificate: {}", e);
            None
        }
    }
}

// Without a trusted clock only the structure can be checked.
fn cert_ok(validity: Option<CertValidity>, now: Option<u64>) -> bool {
    match (validity, now) {
        (Some(v), Some(now)) => v.is_valid_at(now),
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::software::SoftwareElement;
    use crate::session::SessionSupervisor;
    use crate::time::{BuildTimeSource, ManualTimeSource, SystemTimeSource};
    use ::time::OffsetDateTime;

    const NOW: i64 = 1_760_000_000;

    fn cert_der(not_before: i64, not_after: i64) -> Vec<u8> {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["device.local".to_string()]).unwrap();
        params.not_before = OffsetDateTime::from_unix_timestamp(not_before).unwrap();
        params.not_after = OffsetDateTime::from_unix_timestamp(not_after).unwrap();
        params.self_signed(&key).unwrap().der().to_vec()
    }

    fn report_with(device_cert: &[u8], clock: &dyn TimeSource) -> HealthReport {
        let mut element = SoftwareElement::new();
        element.provision_object(DEVICE_CERT, device_cert).unwrap();
        let sup = SessionSupervisor::new(Box::new(element));
        let mut session = sup.acquire().unwrap();
        health_check(&mut session, LicenseStatus::Valid, clock)
    }

    #[test]
    fn test_healthy_element() {
        let mut element = SoftwareElement::new();
        element.provision_object(FACTORY_CERT, &[0x30, 0x82, 0x01]).unwrap();
        let sup = SessionSupervisor::new(Box::new(element));
        let mut session = sup.acquire().unwrap();

        let report = health_check(&mut session, LicenseStatus::Valid, &SystemTimeSource);
        assert!(report.element_ok);
        assert!(report.factory_cert_present);
        assert!(!report.factory_cert_ok);
        assert!(!report.device_cert_present);
        assert!(!report.device_cert_ok);
        assert_eq!(report.cert_days_left, None);
        assert_eq!(report.lifecycle, Some(LifecycleState::Operational));
        assert!(report.boot_counter.is_some());
        assert_eq!(report.security_level, SecurityLevel::Software);
        assert!(report.is_operational());
    }

    #[test]
    fn test_valid_device_cert() {
        let der = cert_der(NOW - SECS_PER_DAY, NOW + 90 * SECS_PER_DAY + 10);
        let report = report_with(&der, &ManualTimeSource::new(NOW as u64));
        assert!(report.device_cert_present);
        assert!(report.device_cert_ok);
        assert_eq!(report.cert_days_left, Some(90));
        assert!(report.to_string().contains("90 days"));
    }

    #[test]
    fn test_expired_device_cert() {
        let der = cert_der(NOW - 400 * SECS_PER_DAY, NOW - 1);
        let report = report_with(&der, &ManualTimeSource::new(NOW as u64));
        assert!(report.device_cert_present);
        assert!(!report.device_cert_ok);
        assert_eq!(report.cert_days_left, Some(0));
    }

    #[test]
    fn test_cert_not_yet_valid() {
        let der = cert_der(NOW + SECS_PER_DAY, NOW + 30 * SECS_PER_DAY);
        let report = report_with(&der, &ManualTimeSource::new(NOW as u64));
        assert!(!report.device_cert_ok);
    }

    #[test]
    fn test_untrusted_clock_checks_structure_only() {
        let der = cert_der(NOW - 400 * SECS_PER_DAY, NOW - 1);
        let report = report_with(&der, &BuildTimeSource);
        assert!(report.device_cert_ok);
        assert_eq!(report.cert_days_left, None);
        assert!(!report.time_reliable);
    }

    #[test]
    fn test_cert_validity_window() {
        let der = cert_der(NOW, NOW + 10 * SECS_PER_DAY);
        let validity = CertValidity::from_der(&der).unwrap();
        assert_eq!(validity.not_before, NOW);
        assert_eq!(validity.not_after, NOW + 10 * SECS_PER_DAY);
        assert!(validity.is_valid_at(NOW as u64));
        assert!(!validity.is_valid_at(NOW as u64 - 1));
        assert_eq!(validity.days_left(NOW as u64), 10);
        assert_eq!(validity.days_left((NOW + 10 * SECS_PER_DAY) as u64 + 1), 0);

        // Fixed-size slot padding after the certificate
        let mut padded = der.clone();
        padded.extend_from_slice(&[0u8; 64]);
        assert_eq!(CertValidity::from_der(&padded).unwrap(), validity);

        assert!(matches!(
            CertValidity::from_der(&[0x30, 0x82, 0x01]),
            Err(SeError::Malformed(_))
        ));
    }

    #[test]
    fn test_unlicensed_not_operational() {
        let sup = SessionSupervisor::new(Box::new(SoftwareElement::new()));
        let mut session = sup.acquire().unwrap();
        let report = health_check(
            &mut session,
            LicenseStatus::NotProvisioned,
            &BuildTimeSource,
        );
        assert!(report.element_ok);
        assert!(!report.license_ok);
        assert!(!report.time_reliable);
        assert!(!report.is_operational());
    }

    #[test]
    fn test_faulted_element() {
        let element = SoftwareElement::new();
        element.set_fault(true);
        let sup = SessionSupervisor::new(Box::new(element));
        let mut session = sup.acquire().unwrap();
        let report = health_check(&mut session, LicenseStatus::Valid, &SystemTimeSource);
        assert!(!report.element_ok);
        assert!(!report.device_cert_present);
        assert_eq!(report.lifecycle, None);
        assert_eq!(report.boot_counter, None);
        assert!(!report.is_operational());
        assert!(report.to_string().contains("FAULT"));
    }

    #[test]
    fn test_report_json() {
        let sup = SessionSupervisor::new(Box::new(SoftwareElement::new()));
        let mut session = sup.acquire().unwrap();
        let json = health_check(&mut session, LicenseStatus::Valid, &SystemTimeSource)
            .to_json()
            .unwrap();
        assert!(json.contains("\"element_ok\":true"));
        assert!(json.contains("\"cert_days_left\":null"));
        assert!(json.contains("\"lifecycle\":\"operational (0x07)\""));
    }
}
