use crate::oid::Oid;

/// The seclient error type.
///
/// Every operation returns one of these variants; each maps onto exactly one
/// [`ErrorCode`] so firmware callers can branch on a closed set.
#[derive(Debug, thiserror::Error)]
pub enum SeError {
    // Hardware / transport
    #[error("Hardware fault: {0}")]
    HardwareFault(String),

    #[error("Secure element busy: session not acquired within {0} ms")]
    Busy(u64),

    // Caller errors
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid length: {0}")]
    InvalidLength(String),

    #[error("Unsupported key length: {0} bits")]
    UnsupportedLength(u16),

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Malformed input: {0}")]
    Malformed(String),

    // Object store
    #[error("Object not found: {0}")]
    NotFound(Oid),

    #[error("Size exceeded for {oid}: {len} bytes (max: {max})")]
    SizeExceeded { oid: Oid, len: usize, max: usize },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    // Cryptographic verification
    #[error("Verification failed")]
    VerificationFailed,

    #[error("Envelope MAC mismatch, message discarded")]
    Tampered,

    #[error("Replay detected: counter {received} <= last accepted {last_accepted}")]
    Replay { received: u32, last_accepted: u32 },

    #[error("Counter overflow on {0}")]
    CounterOverflow(Oid),

    // License
    #[error("License invalid")]
    LicenseInvalid,

    #[error("Library not licensed: call license_init() first")]
    NotLicensed,
}

/// Closed error-code enumeration exposed to firmware callers.
///
/// The numeric values are stable and may cross an FFI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    HardwareFault = -1,
    InvalidParameter = -2,
    ObjectNotFound = -3,
    SizeExceeded = -4,
    AccessDenied = -5,
    VerificationFailed = -6,
    LicenseInvalid = -7,
    CounterOverflow = -8,
}

impl SeError {
    /// Collapse this error into the closed error-code set.
    pub fn code(&self) -> ErrorCode {
        match self {
            SeError::HardwareFault(_) | SeError::Busy(_) => ErrorCode::HardwareFault,
            SeError::InvalidParameter(_)
            | SeError::InvalidLength(_)
            | SeError::UnsupportedLength(_)
            | SeError::InvalidState(_)
            | SeError::Malformed(_) => ErrorCode::InvalidParameter,
            SeError::NotFound(_) => ErrorCode::ObjectNotFound,
            SeError::SizeExceeded { .. } => ErrorCode::SizeExceeded,
            SeError::AccessDenied(_) => ErrorCode::AccessDenied,
            SeError::VerificationFailed | SeError::Tampered | SeError::Replay { .. } => {
                ErrorCode::VerificationFailed
            }
            SeError::CounterOverflow(_) => ErrorCode::CounterOverflow,
            SeError::LicenseInvalid | SeError::NotLicensed => ErrorCode::LicenseInvalid,
        }
    }

    /// Whether a caller may retry the operation after a bounded delay.
    ///
    /// The core never retries by itself: a retried counter increment may
    /// double-count.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SeError::HardwareFault(_) | SeError::Busy(_))
    }
}

impl From<serde_json::Error> for SeError {
    fn from(err: serde_json::Error) -> Self {
        SeError::Malformed(format!("JSON: {}", err))
    }
}

impl From<hex::FromHexError> for SeError {
    fn from(err: hex::FromHexError) -> Self {
        SeError::Malformed(format!("hex: {}", err))
    }
}

impl From<base64::DecodeError> for SeError {
    fn from(err: base64::DecodeError) -> Self {
        SeError::Malformed(format!("base64: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SeError::VerificationFailed;
        assert_eq!(err.to_string(), "Verification failed");

        let err = SeError::Tampered;
        assert_eq!(err.to_string(), "Envelope MAC mismatch, message discarded");

        let err = SeError::NotFound(Oid(0xE0F1));
        assert_eq!(err.to_string(), "Object not found: 0xE0F1");

        let err = SeError::SizeExceeded {
            oid: Oid(0xF1D0),
            len: 141,
            max: 140,
        };
        assert_eq!(
            err.to_string(),
            "Size exceeded for 0xF1D0: 141 bytes (max: 140)"
        );

        let err = SeError::Replay {
            received: 4,
            last_accepted: 7,
        };
        assert_eq!(
            err.to_string(),
            "Replay detected: counter 4 <= last accepted 7"
        );
    }

    #[test]
    fn test_error_codes_are_closed() {
        assert_eq!(
            SeError::HardwareFault("i2c nack".into()).code(),
            ErrorCode::HardwareFault
        );
        assert_eq!(SeError::Busy(100).code(), ErrorCode::HardwareFault);
        assert_eq!(
            SeError::UnsupportedLength(64).code(),
            ErrorCode::InvalidParameter
        );
        assert_eq!(
            SeError::NotFound(Oid(0x1234)).code(),
            ErrorCode::ObjectNotFound
        );
        assert_eq!(SeError::Tampered.code(), ErrorCode::VerificationFailed);
        assert_eq!(
            SeError::CounterOverflow(Oid(0xE120)).code(),
            ErrorCode::CounterOverflow
        );
        assert_eq!(SeError::NotLicensed.code(), ErrorCode::LicenseInvalid);
    }

    #[test]
    fn test_numeric_codes() {
        assert_eq!(ErrorCode::Success as i32, 0);
        assert_eq!(ErrorCode::HardwareFault as i32, -1);
        assert_eq!(ErrorCode::CounterOverflow as i32, -8);
    }

    #[test]
    fn test_retryable() {
        assert!(SeError::HardwareFault("timeout".into()).is_retryable());
        assert!(SeError::Busy(10).is_retryable());
        assert!(!SeError::VerificationFailed.is_retryable());
        assert!(!SeError::CounterOverflow(Oid(0xE120)).is_retryable());
    }

    #[test]
    fn test_error_from_json_error() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: SeError = json_err.into();
        assert!(err.to_string().contains("Malformed input"));
        assert_eq!(err.code(), ErrorCode::InvalidParameter);
    }
}
