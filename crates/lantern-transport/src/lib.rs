//! # LANTERN Transport
//!
//! The on-wire record layer: length-prefixed framing over a reliable byte
//! stream, with per-direction AEAD after the handshake installs keys.
//!
//! Each transport frame is:
//!
//! ```text
//!  0                   4
//! +--------------------+------------------------------------+
//! |  length (u32 BE)   |  AEAD ciphertext || 16-byte tag    |
//! +--------------------+------------------------------------+
//! ```
//!
//! The nonce is implicit: both sides keep a 64-bit counter per direction,
//! encoded big-endian into the low 8 bytes of the 12-byte nonce. The
//! 4-byte length prefix is the AEAD associated data, binding frame
//! boundaries to the ciphertext. Every fault here is fatal to the session.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod frame;
pub mod record;

use lantern_crypto::CryptoError;
use thiserror::Error;

/// Maximum typed-message payload carried in one record (16 MiB).
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Maximum record plaintext: codec header (4-byte payload length + 1-byte
/// kind) plus the payload.
pub const MAX_PLAINTEXT: usize = 5 + MAX_PAYLOAD;

/// Maximum on-wire frame body: plaintext plus the authentication tag.
pub const MAX_FRAME: usize = MAX_PLAINTEXT + lantern_crypto::aead::TAG_SIZE;

/// Record-layer errors. All tear down the session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A frame advertised a zero length.
    #[error("zero-length frame")]
    EmptyFrame,

    /// A frame advertised a length beyond the protocol maximum.
    #[error("frame length {len} out of range (max {MAX_FRAME})")]
    FrameTooLarge {
        /// The advertised length.
        len: u32,
    },

    /// A record plaintext exceeded the protocol maximum.
    #[error("record payload of {len} bytes exceeds maximum {MAX_PLAINTEXT}")]
    PayloadTooLarge {
        /// The offending plaintext length.
        len: usize,
    },

    /// Socket failure, including truncated reads at end of stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// AEAD failure or counter exhaustion.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
