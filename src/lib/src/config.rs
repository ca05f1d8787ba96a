//! Client configuration

use crate::auth::DEFAULT_CHALLENGE_EXPIRY_SECS;
use crate::channel::{Padding, SecureChannel};
use crate::error::SeError;
use crate::keys::KeyHandle;
use crate::session::DEFAULT_SESSION_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// License material handed to the device at provisioning time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    /// Base64 DER ECDSA signature by the issuer
    pub license_key: Option<String>,

    /// Hex UID the license was minted for. When set, it must match the
    /// UID read from the element.
    pub expected_uid: Option<String>,

    /// Signed license metadata appended to the UID before verification
    pub metadata: Option<String>,
}

/// Configuration for [`DeviceClient`](crate::client::DeviceClient)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound on waiting for the element session, in milliseconds
    pub session_timeout_ms: u64,

    /// Validity window of an authentication challenge, in seconds
    pub challenge_expiry_secs: u64,

    /// Whether the channel MAC covers the IV as well as the ciphertext
    pub mac_covers_iv: bool,

    pub padding: Padding,

    pub license: LicenseConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT.as_millis() as u64,
            challenge_expiry_secs: DEFAULT_CHALLENGE_EXPIRY_SECS,
            mac_covers_iv: true,
            padding: Padding::Pkcs7,
            license: LicenseConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Settings that interoperate with deployed reference firmware:
    /// zero padding and a MAC over the ciphertext only.
    pub fn reference_compatible() -> Self {
        Self {
            mac_covers_iv: false,
            padding: Padding::Zero,
            ..Self::default()
        }
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_challenge_expiry(mut self, secs: u64) -> Self {
        self.challenge_expiry_secs = secs;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_mac_covers_iv(mut self, covers_iv: bool) -> Self {
        self.mac_covers_iv = covers_iv;
        self
    }

    pub fn with_license_key(mut self, license_key: impl Into<String>) -> Self {
        self.license.license_key = Some(license_key.into());
        self
    }

    pub fn with_expected_uid(mut self, uid_hex: impl Into<String>) -> Self {
        self.license.expected_uid = Some(uid_hex.into());
        self
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Reject settings that would make every operation fail.
    pub fn validate(&self) -> Result<(), SeError> {
        if self.session_timeout_ms == 0 {
            return Err(SeError::InvalidParameter(
                "session timeout must be non-zero".into(),
            ));
        }
        if self.challenge_expiry_secs == 0 {
            return Err(SeError::InvalidParameter(
                "challenge expiry must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Secure channel over the given keys with this config's framing.
    pub fn channel(&self, aes: KeyHandle, mac: KeyHandle) -> Result<SecureChannel, SeError> {
        Ok(SecureChannel::new(aes, mac)?
            .with_padding(self.padding)
            .with_mac_covers_iv(self.mac_covers_iv))
    }

    pub fn to_json(&self) -> Result<String, SeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.session_timeout(), Duration::from_secs(10));
        assert_eq!(config.challenge_expiry_secs, 30);
        assert!(config.mac_covers_iv);
        assert_eq!(config.padding, Padding::Pkcs7);
        assert!(config.license.license_key.is_none());
    }

    #[test]
    fn test_reference_compatible() {
        let config = ClientConfig::reference_compatible();
        assert!(!config.mac_covers_iv);
        assert_eq!(config.padding, Padding::Zero);
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::default()
            .with_session_timeout(Duration::from_millis(250))
            .with_challenge_expiry(5)
            .with_license_key("MEUCIEjU")
            .with_expected_uid("CD16");
        assert_eq!(config.session_timeout_ms, 250);
        assert_eq!(config.challenge_expiry_secs, 5);
        assert_eq!(config.license.license_key.as_deref(), Some("MEUCIEjU"));
        assert_eq!(config.license.expected_uid.as_deref(), Some("CD16"));
    }

    #[test]
    fn test_json_roundtrip_and_partial() {
        let config = ClientConfig::reference_compatible().with_license_key("abc=");
        let parsed = ClientConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);

        let partial = ClientConfig::from_json(r#"{"padding":"zero"}"#).unwrap();
        assert_eq!(partial.padding, Padding::Zero);
        assert_eq!(partial.challenge_expiry_secs, 30);
    }

    #[test]
    fn test_invalid_rejected() {
        assert!(matches!(
            ClientConfig::from_json(r#"{"session_timeout_ms":0}"#),
            Err(SeError::InvalidParameter(_))
        ));
        assert!(matches!(
            ClientConfig::from_json("{not json"),
            Err(SeError::Malformed(_))
        ));
    }
}
