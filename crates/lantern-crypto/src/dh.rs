//! Ephemeral X25519 key agreement.

use crate::random::SecureRng;
use rand_core::RngCore;
use x25519_dalek::{x25519, X25519_BASEPOINT_BYTES};
use zeroize::{Zeroize, Zeroizing};

/// X25519 key and shared-secret size.
pub const DH_SIZE: usize = 32;

/// An ephemeral X25519 key pair.
///
/// Generated once per handshake; the secret scalar may be used for more
/// than one DH (the XX pattern uses each ephemeral twice) and is wiped on
/// drop.
pub struct EphemeralKeypair {
    secret: [u8; DH_SIZE],
    public: [u8; DH_SIZE],
}

impl EphemeralKeypair {
    /// Generate a fresh ephemeral key pair.
    #[must_use]
    pub fn generate(rng: &mut SecureRng) -> Self {
        let mut secret = [0u8; DH_SIZE];
        rng.fill_bytes(&mut secret);
        let public = x25519(secret, X25519_BASEPOINT_BYTES);
        Self { secret, public }
    }

    /// Get the public key bytes.
    #[must_use]
    pub fn public(&self) -> &[u8; DH_SIZE] {
        &self.public
    }

    /// Compute the shared secret with a peer public key.
    #[must_use]
    pub fn dh(&self, peer_public: &[u8; DH_SIZE]) -> Zeroizing<[u8; DH_SIZE]> {
        Zeroizing::new(x25519(self.secret, *peer_public))
    }
}

impl Drop for EphemeralKeypair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Raw X25519 between a secret scalar and a peer public key.
///
/// The scalar is clamped internally; passing an unclamped scalar (such as
/// the SHA-512 prefix of an Ed25519 seed) is fine.
#[must_use]
pub fn diffie_hellman(secret: &[u8; DH_SIZE], peer_public: &[u8; DH_SIZE]) -> Zeroizing<[u8; DH_SIZE]> {
    Zeroizing::new(x25519(*secret, *peer_public))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dh_agreement() {
        let mut rng = SecureRng::new();
        let a = EphemeralKeypair::generate(&mut rng);
        let b = EphemeralKeypair::generate(&mut rng);

        let ab = a.dh(b.public());
        let ba = b.dh(a.public());
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn test_distinct_keypairs_distinct_secrets() {
        let mut rng = SecureRng::new();
        let a = EphemeralKeypair::generate(&mut rng);
        let b = EphemeralKeypair::generate(&mut rng);
        let c = EphemeralKeypair::generate(&mut rng);

        assert_ne!(a.public(), b.public());
        assert_ne!(*a.dh(c.public()), *b.dh(c.public()));
    }
}
