//! SHA-256 hashing, HKDF-SHA256 derivation, and constant-time compare.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// SHA-256 digest size in bytes.
pub const DIGEST_SIZE: usize = 32;

/// Compute SHA-256 over a byte slice.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// HKDF-Extract with SHA-256: combine a salt and input key material into a PRK.
#[must_use]
pub fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> [u8; DIGEST_SIZE] {
    let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&prk);
    out
}

/// HKDF-Expand with SHA-256: derive `out.len()` bytes from a PRK and label.
///
/// # Panics
///
/// Panics if `out` exceeds the RFC 5869 limit of 255 × 32 bytes; all
/// callers in this crate derive at most 64 bytes.
pub fn hkdf_expand(prk: &[u8; DIGEST_SIZE], info: &[u8], out: &mut [u8]) {
    let hk = Hkdf::<Sha256>::from_prk(prk).expect("PRK is a full digest");
    hk.expand(info, out).expect("output within HKDF limit");
}

/// Two-output HKDF as used by the handshake chaining step:
/// `(out1, out2) = HKDF(salt = ck, ikm, 2 × 32)` with empty info.
#[must_use]
pub fn hkdf2(ck: &[u8; DIGEST_SIZE], ikm: &[u8]) -> ([u8; 32], [u8; 32]) {
    let prk = hkdf_extract(ck, ikm);
    let mut okm = [0u8; 64];
    hkdf_expand(&prk, &[], &mut okm);
    let mut a = [0u8; 32];
    let mut b = [0u8; 32];
    a.copy_from_slice(&okm[..32]);
    b.copy_from_slice(&okm[32..]);
    (a, b)
}

/// Compare two byte slices in constant time.
///
/// Slices of unequal length compare unequal without leaking contents.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc")
        let digest = sha256(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hkdf2_deterministic() {
        let ck = [0x11u8; 32];
        let (a1, b1) = hkdf2(&ck, b"input");
        let (a2, b2) = hkdf2(&ck, b"input");
        assert_eq!(a1, a2);
        assert_eq!(b1, b2);
        assert_ne!(a1, b1);
    }

    #[test]
    fn test_hkdf2_domain_separation() {
        let ck = [0x11u8; 32];
        let (a1, _) = hkdf2(&ck, b"input-a");
        let (a2, _) = hkdf2(&ck, b"input-b");
        assert_ne!(a1, a2);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"diff"));
        assert!(!constant_time_eq(b"short", b"longer input"));
    }
}
