//! Raw object access validated against the OID registry.
//!
//! Unknown identifiers, oversized payloads and raw access to key material
//! are refused here, before any command is sent to the element.

use crate::error::SeError;
use crate::oid::{self, Oid};
use crate::session::Session;

/// Read the payload of `oid`, refusing objects longer than `max_len`.
pub fn read(session: &mut Session<'_>, oid: Oid, max_len: usize) -> Result<Vec<u8>, SeError> {
    let spec = oid::lookup(oid)?;
    if !spec.kind.raw_readable() {
        return Err(SeError::AccessDenied(format!(
            "{} ({}) cannot be read raw",
            oid, spec.name
        )));
    }

    let data = session.element().read_object(oid)?;
    if data.len() > max_len {
        return Err(SeError::SizeExceeded {
            oid,
            len: data.len(),
            max: max_len,
        });
    }
    log::debug!("read {} bytes from {}", data.len(), oid);
    Ok(data)
}

/// Replace the payload of `oid`.
pub fn write(session: &mut Session<'_>, oid: Oid, data: &[u8]) -> Result<(), SeError> {
    let spec = oid::lookup(oid)?;
    if !spec.kind.raw_writable() {
        return Err(SeError::AccessDenied(format!(
            "{} ({}) cannot be written raw",
            oid, spec.name
        )));
    }
    if data.len() > spec.max_len {
        return Err(SeError::SizeExceeded {
            oid,
            len: data.len(),
            max: spec.max_len,
        });
    }

    session.element().write_object(oid, data)?;
    log::debug!("wrote {} bytes to {}", data.len(), oid);
    Ok(())
}
