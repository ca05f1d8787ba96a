//! Encrypt-then-MAC secure channel.
//!
//! Send: pad, AES-CBC encrypt under a fresh IV, HMAC-SHA256 the result.
//! Receive: recompute the MAC, compare in constant time, and decrypt only
//! when it matches. A mismatch returns [`SeError::Tampered`] without a
//! single decryption call reaching the element.
//!
//! # Wire format
//!
//! ```text
//! +----------+---------------------+-----------+
//! | IV (16)  | ciphertext (N*16)   | MAC (32)  |
//! +----------+---------------------+-----------+
//! ```
//!
//! The MAC covers `IV || ciphertext` unless the channel is configured for
//! ciphertext-only MACs, which older peers expect.

use crate::audit;
use crate::crypto::{self, AES_BLOCK_SIZE, IV_SIZE};
use crate::error::SeError;
use crate::keys::{KeyAlgorithm, KeyHandle};
use crate::session::Session;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

pub const MAC_SIZE: usize = 32;

/// Smallest well-formed envelope: IV, one block, MAC.
pub const MIN_ENVELOPE_LEN: usize = IV_SIZE + AES_BLOCK_SIZE + MAC_SIZE;

/// Block padding applied before encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    /// Fill with 0x00 to the next block boundary. Unpadding strips every
    /// trailing 0x00, so payloads must not end in NUL (fine for JSON text).
    Zero,
    /// RFC 5652 padding, always adds 1-16 bytes.
    #[default]
    Pkcs7,
}

impl Padding {
    pub fn pad(&self, data: &[u8]) -> Result<Vec<u8>, SeError> {
        match self {
            Padding::Zero => {
                if data.last() == Some(&0) {
                    return Err(SeError::InvalidParameter(
                        "zero padding cannot carry a payload ending in 0x00".into(),
                    ));
                }
                let blocks = std::cmp::max(1, data.len().div_ceil(AES_BLOCK_SIZE));
                let mut out = data.to_vec();
                out.resize(blocks * AES_BLOCK_SIZE, 0);
                Ok(out)
            }
            Padding::Pkcs7 => {
                let pad = AES_BLOCK_SIZE - data.len() % AES_BLOCK_SIZE;
                let mut out = Vec::with_capacity(data.len() + pad);
                out.extend_from_slice(data);
                out.resize(data.len() + pad, pad as u8);
                Ok(out)
            }
        }
    }

    pub fn unpad(&self, data: &[u8]) -> Result<Vec<u8>, SeError> {
        match self {
            Padding::Zero => {
                let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                Ok(data[..end].to_vec())
            }
            Padding::Pkcs7 => {
                let pad = *data
                    .last()
                    .ok_or_else(|| SeError::Malformed("empty plaintext".into()))?
                    as usize;
                let valid = (1..=AES_BLOCK_SIZE).contains(&pad)
                    && pad <= data.len()
                    && data[data.len() - pad..].iter().all(|&b| b as usize == pad);
                if !valid {
                    return Err(SeError::Malformed("invalid PKCS#7 padding".into()));
                }
                Ok(data[..data.len() - pad].to_vec())
            }
        }
    }
}

/// `{iv, ciphertext, mac}` as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub iv: [u8; IV_SIZE],
    pub ciphertext: Vec<u8>,
    pub mac: [u8; MAC_SIZE],
}

impl Envelope {
    pub fn len(&self) -> usize {
        IV_SIZE + self.ciphertext.len() + MAC_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.mac);
        out
    }

    /// Split `IV || ciphertext || MAC`, checking only the framing.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SeError> {
        if bytes.len() < MIN_ENVELOPE_LEN
            || (bytes.len() - IV_SIZE - MAC_SIZE) % AES_BLOCK_SIZE != 0
        {
            return Err(SeError::Malformed(format!(
                "envelope of {} bytes is not IV(16) || N*16 || MAC(32)",
                bytes.len()
            )));
        }

        let (iv, rest) = bytes.split_at(IV_SIZE);
        let (ciphertext, mac) = rest.split_at(rest.len() - MAC_SIZE);

        let mut envelope = Envelope {
            iv: [0u8; IV_SIZE],
            ciphertext: ciphertext.to_vec(),
            mac: [0u8; MAC_SIZE],
        };
        envelope.iv.copy_from_slice(iv);
        envelope.mac.copy_from_slice(mac);
        Ok(envelope)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(s: &str) -> Result<Self, SeError> {
        Self::from_bytes(&STANDARD.decode(s.trim())?)
    }
}

/// Channel bound to one AES key and one HMAC key inside the element.
#[derive(Debug, Clone)]
pub struct SecureChannel {
    aes: KeyHandle,
    mac: KeyHandle,
    mac_covers_iv: bool,
    padding: Padding,
}

impl SecureChannel {
    pub fn new(aes: KeyHandle, mac: KeyHandle) -> Result<Self, SeError> {
        aes.require(KeyAlgorithm::Aes)?;
        mac.require(KeyAlgorithm::HmacSha256)?;
        Ok(SecureChannel {
            aes,
            mac,
            mac_covers_iv: true,
            padding: Padding::default(),
        })
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    /// Ciphertext-only MAC when `false`.
    pub fn with_mac_covers_iv(mut self, covers_iv: bool) -> Self {
        self.mac_covers_iv = covers_iv;
        self
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    pub fn mac_covers_iv(&self) -> bool {
        self.mac_covers_iv
    }

    fn mac_input(&self, iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> Vec<u8> {
        if self.mac_covers_iv {
            let mut input = Vec::with_capacity(IV_SIZE + ciphertext.len());
            input.extend_from_slice(iv);
            input.extend_from_slice(ciphertext);
            input
        } else {
            ciphertext.to_vec()
        }
    }

    /// Encrypt and authenticate `plaintext` under a fresh random IV.
    pub fn send(&self, session: &mut Session<'_>, plaintext: &[u8]) -> Result<Envelope, SeError> {
        self.seal(session, plaintext, None)
    }

    /// As [`send`](Self::send) with a caller-chosen IV. Never reuse an IV
    /// under the same key.
    pub fn send_with_iv(
        &self,
        session: &mut Session<'_>,
        plaintext: &[u8],
        iv: [u8; IV_SIZE],
    ) -> Result<Envelope, SeError> {
        self.seal(session, plaintext, Some(iv))
    }

    fn seal(
        &self,
        session: &mut Session<'_>,
        plaintext: &[u8],
        iv: Option<[u8; IV_SIZE]>,
    ) -> Result<Envelope, SeError> {
        let padded = self.padding.pad(plaintext)?;
        let (iv, ciphertext) = crypto::aes_encrypt(session, &self.aes, &padded, iv)?;
        let mac = crypto::hmac_sha256(session, &self.mac, &self.mac_input(&iv, &ciphertext))?;
        Ok(Envelope {
            iv,
            ciphertext,
            mac,
        })
    }

    /// Authenticate, then decrypt.
    pub fn receive(
        &self,
        session: &mut Session<'_>,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, SeError> {
        if envelope.ciphertext.is_empty() || envelope.ciphertext.len() % AES_BLOCK_SIZE != 0 {
            return Err(SeError::Malformed(format!(
                "ciphertext of {} bytes is not block aligned",
                envelope.ciphertext.len()
            )));
        }

        let expected = crypto::hmac_sha256(
            session,
            &self.mac,
            &self.mac_input(&envelope.iv, &envelope.ciphertext),
        )?;
        if !bool::from(expected[..].ct_eq(&envelope.mac[..])) {
            log::warn!("envelope MAC mismatch, discarding {} bytes", envelope.len());
            audit::log_tamper_detected(envelope.len());
            return Err(SeError::Tampered);
        }

        let padded = crypto::aes_decrypt(session, &self.aes, &envelope.iv, &envelope.ciphertext)?;
        self.padding.unpad(&padded)
    }

    /// [`send`](Self::send) straight to wire bytes.
    pub fn send_bytes(&self, session: &mut Session<'_>, plaintext: &[u8]) -> Result<Vec<u8>, SeError> {
        Ok(self.send(session, plaintext)?.to_bytes())
    }

    /// [`receive`](Self::receive) from wire bytes.
    pub fn receive_bytes(&self, session: &mut Session<'_>, wire: &[u8]) -> Result<Vec<u8>, SeError> {
        self.receive(session, &Envelope::from_bytes(wire)?)
    }
}
