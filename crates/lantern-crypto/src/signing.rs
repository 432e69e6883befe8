//! Ed25519 identity signatures.
//!
//! The long-term identity key signs handshake transcripts, and the same key
//! is the static disclosed inside the Noise pattern. The `es`/`se` DH
//! operations therefore need an X25519 view of it: the public key maps to
//! its Montgomery form, and the secret scalar is the clamped SHA-512 prefix
//! of the Ed25519 seed (the standard birational correspondence).

use crate::random::SecureRng;
use crate::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

/// Ed25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// Long-term Ed25519 signing key pair.
///
/// The secret key is zeroized on drop by `ed25519-dalek`.
#[derive(Clone)]
pub struct SigningKeyPair {
    key: SigningKey,
}

impl SigningKeyPair {
    /// Generate a new random key pair.
    #[must_use]
    pub fn generate(rng: &mut SecureRng) -> Self {
        Self {
            key: SigningKey::generate(rng),
        }
    }

    /// Restore a key pair from a 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Get the seed bytes for opaque persistence by the host.
    #[must_use]
    pub fn seed(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.key.to_bytes())
    }

    /// Get the public key bytes.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.key.verifying_key().to_bytes()
    }

    /// Sign a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.key.sign(message).to_bytes()
    }

    /// The X25519 secret scalar corresponding to this identity key.
    ///
    /// Returned unclamped; the DH function clamps before use.
    #[must_use]
    pub fn dh_secret(&self) -> Zeroizing<[u8; 32]> {
        let digest = Sha512::digest(self.key.to_bytes());
        let mut scalar = Zeroizing::new([0u8; 32]);
        scalar.copy_from_slice(&digest[..32]);
        scalar
    }

    /// The X25519 public key corresponding to this identity key.
    #[must_use]
    pub fn dh_public(&self) -> [u8; 32] {
        self.key.verifying_key().to_montgomery().to_bytes()
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public", &hex_prefix(&self.public_bytes()))
            .finish_non_exhaustive()
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes[..8.min(bytes.len())]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Verify an Ed25519 signature against a public key.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidPublicKey`] if the key is not a valid
/// curve point, [`CryptoError::InvalidSignature`] if the signature does not
/// verify or has the wrong length.
pub fn verify(
    public: &[u8; PUBLIC_KEY_SIZE],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(public).map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig_bytes: [u8; SIGNATURE_SIZE] = signature
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature)?;
    let sig = Signature::from_bytes(&sig_bytes);
    key.verify(message, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Map an Ed25519 public key to its X25519 (Montgomery) form.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidPublicKey`] if the bytes are not a valid
/// Ed25519 point.
pub fn montgomery_public(public: &[u8; PUBLIC_KEY_SIZE]) -> Result<[u8; 32], CryptoError> {
    let key = VerifyingKey::from_bytes(public).map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok(key.to_montgomery().to_bytes())
}
