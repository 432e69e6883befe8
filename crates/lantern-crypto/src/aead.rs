//! AES-256-GCM authenticated encryption.
//!
//! Record and handshake ciphers both use:
//! - 256-bit keys
//! - 96-bit nonces derived from a 64-bit message counter
//! - 128-bit authentication tags
//! - Associated data binding ciphertexts to their context
//!
//! Nonces are never generated internally: each direction of a session keeps
//! its own strictly increasing counter and derives the nonce from it.

use crate::CryptoError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use zeroize::ZeroizeOnDrop;

/// AEAD key size (32 bytes / 256 bits).
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size (12 bytes / 96 bits).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (16 bytes / 128 bits).
pub const TAG_SIZE: usize = 16;

/// AES-GCM nonce (12 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create a nonce from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Derive a nonce from a 64-bit message counter.
    ///
    /// Layout: 4 zero bytes followed by the counter big-endian in the low
    /// 8 bytes. This is the wire discipline for every record and handshake
    /// cipher in the protocol.
    #[must_use]
    pub fn from_counter(counter: u64) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        bytes[4..].copy_from_slice(&counter.to_be_bytes());
        Self(bytes)
    }

    /// Get raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// AEAD encryption key (32 bytes), wiped on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the slice is not 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        if slice.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Encrypt plaintext with associated data.
    ///
    /// Returns ciphertext with the authentication tag appended
    /// (`plaintext.len()` + 16 bytes).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] if AEAD encryption fails.
    pub fn seal(&self, nonce: &Nonce, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new((&self.0).into());
        cipher
            .encrypt(
                aes_gcm::Nonce::from_slice(&nonce.0),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Decrypt ciphertext (with trailing tag) under associated data.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] on authentication failure
    /// or if the input is shorter than a tag.
    pub fn open(
        &self,
        nonce: &Nonce,
        ciphertext_and_tag: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext_and_tag.len() < TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let cipher = Aes256Gcm::new((&self.0).into());
        cipher
            .decrypt(
                aes_gcm::Nonce::from_slice(&nonce.0),
                Payload {
                    msg: ciphertext_and_tag,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
