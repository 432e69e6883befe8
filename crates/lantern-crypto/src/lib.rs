//! # LANTERN Crypto
//!
//! Cryptographic primitives for the LANTERN LAN transfer protocol.
//!
//! This crate provides:
//! - AES-256-GCM AEAD with counter-derived nonces
//! - SHA-256 hashing, HKDF-SHA256 key derivation, constant-time compare
//! - Ed25519 identity signatures and the X25519 view of the identity key
//! - Ephemeral X25519 key agreement
//! - OS-backed secure randomness
//! - The `Noise_XX_25519_AESGCM_SHA256` handshake state machine
//!
//! All secret material (keys, chaining state, DH outputs) is zeroized when
//! its owning value is dropped. Nonces are always derived by the caller;
//! no cipher context is reused across sessions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod dh;
pub mod hash;
pub mod noise;
pub mod random;
pub mod signing;

use thiserror::Error;
use zeroize::ZeroizeOnDrop;

/// Errors surfaced by the primitive layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A key or fixed-size input had the wrong length.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes.
        actual: usize,
    },

    /// A public key was not a valid curve point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// AEAD encryption failed.
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD authentication or decryption failed.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Signature verification failed.
    #[error("signature verification failed")]
    InvalidSignature,

    /// A per-direction message counter would wrap.
    #[error("message counter exhausted")]
    CounterExhausted,

    /// The OS CSPRNG failed.
    #[error("random generation failed")]
    RandomFailed,
}

/// Directional transport keys produced by a completed handshake.
///
/// `send_key` seals records written to the peer; `recv_key` opens records
/// read from it. Both are wiped on drop.
#[derive(ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Key for the local-to-remote direction.
    pub send_key: [u8; 32],
    /// Key for the remote-to-local direction.
    pub recv_key: [u8; 32],
}
