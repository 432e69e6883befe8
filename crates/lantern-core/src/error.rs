//! Error taxonomy for the core.
//!
//! Propagation policy:
//! - `Crypto`, `Handshake`, `Transport`, and `Protocol` errors are fatal to
//!   their session: it is closed, the peer removed, and observers receive
//!   `PeerDisconnected` with the reason.
//! - `Transfer` errors affect only the offending transfer.
//! - `Io` and read/write timeouts tear down only the affected session.
//! - `Cancelled` is the expected shutdown path and is never surfaced as a
//!   failure to observers.

use crate::identity::PeerId;
use crate::protocol::ProtocolError;
use lantern_crypto::noise::HandshakeError;
use lantern_crypto::CryptoError;
use lantern_transport::TransportError;
use thiserror::Error;

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// TCP connect (15 s).
    Dial,
    /// Handshake completion (30 s).
    Handshake,
    /// Socket read.
    Read,
    /// Socket write.
    Write,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            TimeoutPhase::Dial => "dial",
            TimeoutPhase::Handshake => "handshake",
            TimeoutPhase::Read => "read",
            TimeoutPhase::Write => "write",
        };
        f.write_str(phase)
    }
}

/// Errors surfaced by the core.
#[derive(Debug, Error)]
pub enum Error {
    /// Primitive failure (AEAD, signature, key material).
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Handshake failure (authentication, timestamps, ordering).
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Record-layer failure (framing, counters, sealed records).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Typed-message violation (unknown kind, malformed payload).
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// A failure scoped to a single transfer; the session survives.
    #[error("transfer error: {0}")]
    Transfer(String),

    /// No session exists for the peer.
    #[error("not connected to peer {0}")]
    NotConnected(PeerId),

    /// Socket or filesystem failure from the host.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A phase deadline expired.
    #[error("{phase} timed out")]
    Timeout {
        /// Which deadline expired.
        phase: TimeoutPhase,
    },

    /// The operation was cancelled by shutdown.
    #[error("operation cancelled")]
    Cancelled,

    /// An internal channel closed unexpectedly.
    #[error("channel closed: {0}")]
    Channel(String),

    /// An operation was attempted in the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Whether this error must tear down the session it occurred on.
    #[must_use]
    pub fn is_fatal_to_session(&self) -> bool {
        match self {
            Error::Crypto(_)
            | Error::Handshake(_)
            | Error::Transport(_)
            | Error::Protocol(_)
            | Error::Io(_) => true,
            Error::Timeout { phase } => {
                matches!(phase, TimeoutPhase::Read | TimeoutPhase::Write)
            }
            Error::Transfer(_)
            | Error::NotConnected(_)
            | Error::Cancelled
            | Error::Channel(_)
            | Error::InvalidState(_) => false,
        }
    }
}

impl From<lantern_files::FileError> for Error {
    fn from(e: lantern_files::FileError) -> Self {
        // File-side faults are scoped to the transfer they belong to.
        Error::Transfer(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_classification() {
        assert!(Error::Crypto(CryptoError::DecryptionFailed).is_fatal_to_session());
        assert!(Error::Protocol(ProtocolError::UnknownKind(0xEE)).is_fatal_to_session());
        assert!(Error::Timeout {
            phase: TimeoutPhase::Read
        }
        .is_fatal_to_session());

        assert!(!Error::Transfer("hash mismatch".into()).is_fatal_to_session());
        assert!(!Error::Cancelled.is_fatal_to_session());
        assert!(!Error::Timeout {
            phase: TimeoutPhase::Dial
        }
        .is_fatal_to_session());
    }
}
