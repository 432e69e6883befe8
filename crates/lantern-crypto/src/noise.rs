//! `Noise_XX` handshake for mutual authentication.
//!
//! Hand-rolled `Noise_XX_25519_AESGCM_SHA256` state machine:
//! - Pattern: `XX` (mutual authentication, identity disclosed only after
//!   the first DH)
//! - DH: X25519
//! - Cipher: AES-256-GCM
//! - Hash: SHA-256
//!
//! ## Message Flow
//!
//! ```text
//! Message 1: Initiator → Responder: e
//! Message 2: Responder → Initiator: e, ee, s, es, payload
//! Message 3: Initiator → Responder: s, se, payload
//! ```
//!
//! The static `s` disclosed in messages 2 and 3 is the sender's Ed25519
//! identity key; DH against it uses its Montgomery form. Each payload
//! carries an 8-byte big-endian Unix-milliseconds timestamp, a 2-byte
//! big-endian signature length, and an Ed25519 signature over
//! `h || timestamp` made with the identity key. Timestamps more than five
//! minutes from local time are rejected.
//!
//! After message 3 both parties call [`Handshake::finish`] to split the
//! chaining key into directional transport keys. Any decryption failure,
//! signature failure, or out-of-order message is terminal: the state is
//! dropped (zeroizing all secrets) and the stream must be closed.

use crate::aead::{AeadKey, Nonce, TAG_SIZE};
use crate::dh::{diffie_hellman, EphemeralKeypair, DH_SIZE};
use crate::hash::hkdf2;
use crate::random::SecureRng;
use crate::signing::{self, SigningKeyPair, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::{CryptoError, SessionKeys};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

/// Noise protocol name; zero-padded to 32 bytes for the initial hash.
const PROTOCOL_NAME: &[u8] = b"Noise_XX_25519_AESGCM_SHA256";

/// Allowed clock skew between peers (5 minutes, in milliseconds).
const MAX_TIMESTAMP_SKEW_MS: u64 = 5 * 60 * 1000;

/// Length of message 1: the bare ephemeral public key.
pub const MESSAGE_1_LEN: usize = DH_SIZE;

/// Length of an encrypted static key (32-byte key + tag).
const SEALED_STATIC_LEN: usize = PUBLIC_KEY_SIZE + TAG_SIZE;

/// Length of a signed payload before sealing: timestamp + length + signature.
const PAYLOAD_LEN: usize = 8 + 2 + SIGNATURE_SIZE;

/// Length of message 2: `e || enc(s) || enc(payload)`.
pub const MESSAGE_2_LEN: usize = DH_SIZE + SEALED_STATIC_LEN + PAYLOAD_LEN + TAG_SIZE;

/// Length of message 3: `enc(s) || enc(payload)`.
pub const MESSAGE_3_LEN: usize = SEALED_STATIC_LEN + PAYLOAD_LEN + TAG_SIZE;

/// Role in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Initiates the handshake (sends message 1).
    Initiator,
    /// Responds to the handshake (receives message 1).
    Responder,
}

/// Progress of the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakePhase {
    /// No messages processed yet.
    Initial,
    /// Message 1 sent (initiator) or received (responder).
    InitExchanged,
    /// Message 2 received (initiator) or sent (responder).
    ResponseExchanged,
    /// Message 3 processed; transport keys are available.
    Complete,
}

/// Handshake failures. All are terminal for the connection.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// A message arrived in the wrong phase for this role.
    #[error("unexpected handshake message for current state")]
    OutOfOrder,
    /// A message had an impossible length or structure.
    #[error("malformed handshake message")]
    Malformed,
    /// The peer's identity signature did not verify.
    #[error("peer identity verification failed")]
    Authentication,
    /// The peer's timestamp was outside the ±5 minute window.
    #[error("handshake timestamp outside the allowed window")]
    StaleTimestamp,
    /// A primitive failed (typically AEAD authentication).
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Cipher half of the symmetric state: optional key plus message counter.
struct CipherState {
    key: Option<AeadKey>,
    counter: u64,
}

impl CipherState {
    fn new() -> Self {
        Self {
            key: None,
            counter: 0,
        }
    }

    fn install(&mut self, key: [u8; 32]) {
        self.key = Some(AeadKey::new(key));
        self.counter = 0;
    }

    fn encrypt_with_ad(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match &self.key {
            None => Ok(plaintext.to_vec()),
            Some(key) => {
                let nonce = Nonce::from_counter(self.counter);
                let sealed = key.seal(&nonce, plaintext, ad)?;
                self.counter = self
                    .counter
                    .checked_add(1)
                    .ok_or(CryptoError::CounterExhausted)?;
                Ok(sealed)
            }
        }
    }

    fn decrypt_with_ad(&mut self, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match &self.key {
            None => Ok(ciphertext.to_vec()),
            Some(key) => {
                let nonce = Nonce::from_counter(self.counter);
                let opened = key.open(&nonce, ciphertext, ad)?;
                self.counter = self
                    .counter
                    .checked_add(1)
                    .ok_or(CryptoError::CounterExhausted)?;
                Ok(opened)
            }
        }
    }
}

/// Chaining key + transcript hash + current cipher.
struct SymmetricState {
    ck: [u8; 32],
    h: [u8; 32],
    cipher: CipherState,
}

impl SymmetricState {
    fn new() -> Self {
        let mut h = [0u8; 32];
        h[..PROTOCOL_NAME.len()].copy_from_slice(PROTOCOL_NAME);
        Self {
            ck: h,
            h,
            cipher: CipherState::new(),
        }
    }

    fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.h);
        hasher.update(data);
        self.h.copy_from_slice(&hasher.finalize());
    }

    fn mix_key(&mut self, ikm: &[u8]) {
        let (ck, k) = hkdf2(&self.ck, ikm);
        self.ck = ck;
        self.cipher.install(k);
    }

    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let sealed = self.cipher.encrypt_with_ad(&self.h, plaintext)?;
        self.mix_hash(&sealed);
        Ok(sealed)
    }

    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let opened = self.cipher.decrypt_with_ad(&self.h, ciphertext)?;
        self.mix_hash(ciphertext);
        Ok(opened)
    }

    fn split(&self, role: Role) -> SessionKeys {
        let (k1, k2) = hkdf2(&self.ck, &[]);
        match role {
            Role::Initiator => SessionKeys {
                send_key: k1,
                recv_key: k2,
            },
            Role::Responder => SessionKeys {
                send_key: k2,
                recv_key: k1,
            },
        }
    }
}

impl Drop for SymmetricState {
    fn drop(&mut self) {
        self.ck.zeroize();
    }
}

/// `Noise_XX` handshake state.
///
/// Create with [`Handshake::initiator`] or [`Handshake::responder`], drive
/// the three pattern messages with the `write_*`/`read_*` pairs in order,
/// then call [`Handshake::finish`].
pub struct Handshake {
    role: Role,
    phase: HandshakePhase,
    symmetric: SymmetricState,
    signing: SigningKeyPair,
    e: EphemeralKeypair,
    re: Option<[u8; DH_SIZE]>,
    rs: Option<[u8; PUBLIC_KEY_SIZE]>,
}

impl Handshake {
    /// Create the initiator side.
    #[must_use]
    pub fn initiator(signing: SigningKeyPair, rng: &mut SecureRng) -> Self {
        Self::new(Role::Initiator, signing, rng)
    }

    /// Create the responder side.
    #[must_use]
    pub fn responder(signing: SigningKeyPair, rng: &mut SecureRng) -> Self {
        Self::new(Role::Responder, signing, rng)
    }

    fn new(role: Role, signing: SigningKeyPair, rng: &mut SecureRng) -> Self {
        Self {
            role,
            phase: HandshakePhase::Initial,
            symmetric: SymmetricState::new(),
            signing,
            e: EphemeralKeypair::generate(rng),
            re: None,
            rs: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Role of this side.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether the pattern has completed and keys can be split.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase == HandshakePhase::Complete
    }

    /// The peer's Ed25519 identity key, once disclosed.
    #[must_use]
    pub fn remote_static(&self) -> Option<&[u8; PUBLIC_KEY_SIZE]> {
        self.rs.as_ref()
    }

    fn expect(&self, role: Role, phase: HandshakePhase) -> Result<(), HandshakeError> {
        if self.role == role && self.phase == phase {
            Ok(())
        } else {
            Err(HandshakeError::OutOfOrder)
        }
    }

    /// Initiator: produce message 1 (`e`).
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::OutOfOrder`] if called out of sequence or
    /// by the responder.
    pub fn write_initial(&mut self) -> Result<Vec<u8>, HandshakeError> {
        self.expect(Role::Initiator, HandshakePhase::Initial)?;
        let e_pub = *self.e.public();
        self.symmetric.mix_hash(&e_pub);
        self.phase = HandshakePhase::InitExchanged;
        Ok(e_pub.to_vec())
    }

    /// Responder: consume message 1.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::OutOfOrder`] on sequence violations and
    /// [`HandshakeError::Malformed`] on a bad length.
    pub fn read_initial(&mut self, message: &[u8]) -> Result<(), HandshakeError> {
        self.expect(Role::Responder, HandshakePhase::Initial)?;
        let re: [u8; DH_SIZE] = message.try_into().map_err(|_| HandshakeError::Malformed)?;
        self.symmetric.mix_hash(&re);
        self.re = Some(re);
        self.phase = HandshakePhase::InitExchanged;
        Ok(())
    }

    /// Responder: produce message 2 (`e, ee, s, es, payload`).
    ///
    /// `now_ms` is the local clock as Unix milliseconds; it is embedded in
    /// the signed payload.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::OutOfOrder`] on sequence violations or a
    /// crypto error if sealing fails.
    pub fn write_response(&mut self, now_ms: u64) -> Result<Vec<u8>, HandshakeError> {
        self.expect(Role::Responder, HandshakePhase::InitExchanged)?;
        let re = self.re.ok_or(HandshakeError::OutOfOrder)?;

        let e_pub = *self.e.public();
        self.symmetric.mix_hash(&e_pub);
        self.symmetric.mix_key(&*self.e.dh(&re));

        let sealed_static = self.symmetric.encrypt_and_hash(&self.signing.public_bytes())?;
        self.symmetric
            .mix_key(&*diffie_hellman(&self.signing.dh_secret(), &re));

        let payload = self.signed_payload(now_ms);
        let sealed_payload = self.symmetric.encrypt_and_hash(&payload)?;

        let mut message = Vec::with_capacity(MESSAGE_2_LEN);
        message.extend_from_slice(&e_pub);
        message.extend_from_slice(&sealed_static);
        message.extend_from_slice(&sealed_payload);

        self.phase = HandshakePhase::ResponseExchanged;
        Ok(message)
    }

    /// Initiator: consume message 2, authenticating the responder.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::Authentication`] if the responder's signature does
    /// not verify, [`HandshakeError::StaleTimestamp`] if its clock is too
    /// far from ours, [`HandshakeError::Crypto`] on AEAD failure.
    pub fn read_response(&mut self, message: &[u8], now_ms: u64) -> Result<(), HandshakeError> {
        self.expect(Role::Initiator, HandshakePhase::InitExchanged)?;
        if message.len() != MESSAGE_2_LEN {
            return Err(HandshakeError::Malformed);
        }

        let re: [u8; DH_SIZE] = message[..DH_SIZE].try_into().expect("length checked");
        self.symmetric.mix_hash(&re);
        self.symmetric.mix_key(&*self.e.dh(&re));

        let sealed_static = &message[DH_SIZE..DH_SIZE + SEALED_STATIC_LEN];
        let static_bytes = self.symmetric.decrypt_and_hash(sealed_static)?;
        let rs: [u8; PUBLIC_KEY_SIZE] = static_bytes
            .as_slice()
            .try_into()
            .map_err(|_| HandshakeError::Malformed)?;

        let rs_mont = signing::montgomery_public(&rs).map_err(|_| HandshakeError::Authentication)?;
        self.symmetric.mix_key(&*self.e.dh(&rs_mont));

        let transcript = self.symmetric.h;
        let payload = self
            .symmetric
            .decrypt_and_hash(&message[DH_SIZE + SEALED_STATIC_LEN..])?;
        verify_payload(&transcript, &payload, &rs, now_ms)?;

        self.re = Some(re);
        self.rs = Some(rs);
        self.phase = HandshakePhase::ResponseExchanged;
        Ok(())
    }

    /// Initiator: produce message 3 (`s, se, payload`).
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::OutOfOrder`] on sequence violations or a
    /// crypto error if sealing fails.
    pub fn write_final(&mut self, now_ms: u64) -> Result<Vec<u8>, HandshakeError> {
        self.expect(Role::Initiator, HandshakePhase::ResponseExchanged)?;
        let re = self.re.ok_or(HandshakeError::OutOfOrder)?;

        let sealed_static = self.symmetric.encrypt_and_hash(&self.signing.public_bytes())?;
        self.symmetric
            .mix_key(&*diffie_hellman(&self.signing.dh_secret(), &re));

        let payload = self.signed_payload(now_ms);
        let sealed_payload = self.symmetric.encrypt_and_hash(&payload)?;

        let mut message = Vec::with_capacity(MESSAGE_3_LEN);
        message.extend_from_slice(&sealed_static);
        message.extend_from_slice(&sealed_payload);

        self.phase = HandshakePhase::Complete;
        Ok(message)
    }

    /// Responder: consume message 3, authenticating the initiator.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Handshake::read_response`].
    pub fn read_final(&mut self, message: &[u8], now_ms: u64) -> Result<(), HandshakeError> {
        self.expect(Role::Responder, HandshakePhase::ResponseExchanged)?;
        if message.len() != MESSAGE_3_LEN {
            return Err(HandshakeError::Malformed);
        }

        let static_bytes = self
            .symmetric
            .decrypt_and_hash(&message[..SEALED_STATIC_LEN])?;
        let rs: [u8; PUBLIC_KEY_SIZE] = static_bytes
            .as_slice()
            .try_into()
            .map_err(|_| HandshakeError::Malformed)?;

        let rs_mont = signing::montgomery_public(&rs).map_err(|_| HandshakeError::Authentication)?;
        self.symmetric.mix_key(&*self.e.dh(&rs_mont));

        let transcript = self.symmetric.h;
        let payload = self
            .symmetric
            .decrypt_and_hash(&message[SEALED_STATIC_LEN..])?;
        verify_payload(&transcript, &payload, &rs, now_ms)?;

        self.rs = Some(rs);
        self.phase = HandshakePhase::Complete;
        Ok(())
    }

    /// Split the chaining key into transport keys and return them together
    /// with the authenticated remote identity key.
    ///
    /// Consumes the state; all handshake secrets are zeroized on drop.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::OutOfOrder`] if the pattern has not
    /// completed.
    pub fn finish(self) -> Result<(SessionKeys, [u8; PUBLIC_KEY_SIZE]), HandshakeError> {
        if self.phase != HandshakePhase::Complete {
            return Err(HandshakeError::OutOfOrder);
        }
        let remote = self.rs.ok_or(HandshakeError::OutOfOrder)?;
        Ok((self.symmetric.split(self.role), remote))
    }

    /// Build the signed payload: `timestamp_be || sig_len_be || sig(h || timestamp)`.
    fn signed_payload(&self, now_ms: u64) -> Vec<u8> {
        let timestamp = now_ms.to_be_bytes();
        let mut to_sign = Vec::with_capacity(32 + 8);
        to_sign.extend_from_slice(&self.symmetric.h);
        to_sign.extend_from_slice(&timestamp);
        let signature = self.signing.sign(&to_sign);

        let mut payload = Vec::with_capacity(PAYLOAD_LEN);
        payload.extend_from_slice(&timestamp);
        payload.extend_from_slice(&(signature.len() as u16).to_be_bytes());
        payload.extend_from_slice(&signature);
        payload
    }
}

/// Check a received payload's signature and timestamp.
///
/// `transcript` is the handshake hash at the moment the payload was sealed
/// (the AEAD associated data), which is what the sender signed.
fn verify_payload(
    transcript: &[u8; 32],
    payload: &[u8],
    remote_static: &[u8; PUBLIC_KEY_SIZE],
    now_ms: u64,
) -> Result<(), HandshakeError> {
    if payload.len() < 10 {
        return Err(HandshakeError::Malformed);
    }
    let timestamp = u64::from_be_bytes(payload[..8].try_into().expect("length checked"));
    let sig_len = u16::from_be_bytes(payload[8..10].try_into().expect("length checked")) as usize;
    if payload.len() != 10 + sig_len {
        return Err(HandshakeError::Malformed);
    }

    let mut signed = Vec::with_capacity(32 + 8);
    signed.extend_from_slice(transcript);
    signed.extend_from_slice(&payload[..8]);
    signing::verify(remote_static, &signed, &payload[10..])
        .map_err(|_| HandshakeError::Authentication)?;

    if now_ms.abs_diff(timestamp) > MAX_TIMESTAMP_SKEW_MS {
        return Err(HandshakeError::StaleTimestamp);
    }
    Ok(())
}
