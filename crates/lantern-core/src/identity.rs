//! Peer identity.
//!
//! A peer is identified by the lowercase hex of the first 16 bytes of
//! SHA-256 over its long-term Ed25519 public key. Byte-wise ordering on
//! [`PeerId`] equals lexicographic ordering on the hex form, which is what
//! the simultaneous-open tie-break compares.

use crate::error::Error;
use lantern_crypto::hash::sha256;
use lantern_crypto::random::SecureRng;
use lantern_crypto::signing::SigningKeyPair;
use std::fmt;
use std::str::FromStr;

/// Size of a peer id in raw bytes (rendered as 32 hex characters).
pub const PEER_ID_SIZE: usize = 16;

/// Stable identifier derived from a peer's public signing key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_SIZE]);

impl PeerId {
    /// Derive the peer id for a public signing key.
    #[must_use]
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let digest = sha256(public_key);
        let mut id = [0u8; PEER_ID_SIZE];
        id.copy_from_slice(&digest[..PEER_ID_SIZE]);
        Self(id)
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PEER_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| Error::InvalidState(format!("invalid peer id: {e}")))?;
        let id: [u8; PEER_ID_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::InvalidState("peer id must be 32 hex characters".into()))?;
        Ok(Self(id))
    }
}

/// The local node's long-term identity.
///
/// Owns the signing key pair exclusively; the secret key is zeroized on
/// drop. The host may persist the seed opaquely and restore it with
/// [`LocalIdentity::from_seed`].
pub struct LocalIdentity {
    signing: SigningKeyPair,
    peer_id: PeerId,
}

impl LocalIdentity {
    /// Generate a fresh identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the OS CSPRNG fails.
    pub fn generate() -> Result<Self, Error> {
        let mut rng = SecureRng::new();
        Ok(Self::from_keypair(SigningKeyPair::generate(&mut rng)))
    }

    /// Restore an identity from a persisted seed.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_keypair(SigningKeyPair::from_seed(seed))
    }

    fn from_keypair(signing: SigningKeyPair) -> Self {
        let peer_id = PeerId::from_public_key(&signing.public_bytes());
        Self { signing, peer_id }
    }

    /// This node's peer id.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// The public signing key.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.signing.public_bytes()
    }

    /// The signing key pair, for driving handshakes.
    #[must_use]
    pub fn signing(&self) -> &SigningKeyPair {
        &self.signing
    }
}

impl fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

/// An authenticated remote peer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RemoteIdentity {
    public_key: [u8; 32],
    peer_id: PeerId,
}

impl RemoteIdentity {
    /// Build from the public key disclosed during the handshake.
    #[must_use]
    pub fn from_public_key(public_key: [u8; 32]) -> Self {
        Self {
            public_key,
            peer_id: PeerId::from_public_key(&public_key),
        }
    }

    /// The peer's public signing key.
    #[must_use]
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    /// The peer's id.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

impl fmt::Debug for RemoteIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteIdentity")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_is_32_hex_chars() {
        let identity = LocalIdentity::generate().unwrap();
        let rendered = identity.peer_id().to_string();
        assert_eq!(rendered.len(), 32);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(rendered, rendered.to_lowercase());
    }

    #[test]
    fn test_peer_id_stable_for_key() {
        let identity = LocalIdentity::generate().unwrap();
        let remote = RemoteIdentity::from_public_key(identity.public_key());
        assert_eq!(identity.peer_id(), remote.peer_id());
    }

    #[test]
    fn test_peer_id_roundtrip_via_str() {
        let identity = LocalIdentity::generate().unwrap();
        let parsed: PeerId = identity.peer_id().to_string().parse().unwrap();
        assert_eq!(parsed, identity.peer_id());
    }

    #[test]
    fn test_bad_peer_id_strings_rejected() {
        assert!("nothex!".parse::<PeerId>().is_err());
        assert!("abcd".parse::<PeerId>().is_err());
    }

    #[test]
    fn test_seed_restore_preserves_peer_id() {
        let identity = LocalIdentity::generate().unwrap();
        let restored = LocalIdentity::from_seed(*identity.signing().seed());
        assert_eq!(identity.peer_id(), restored.peer_id());
    }

    #[test]
    fn test_ordering_matches_hex_ordering() {
        let a = LocalIdentity::generate().unwrap().peer_id();
        let b = LocalIdentity::generate().unwrap().peer_id();
        assert_eq!(a < b, a.to_string() < b.to_string());
    }
}
