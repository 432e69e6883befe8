//! Per-direction AEAD record states.
//!
//! A session owns one [`RecordSender`] and one [`RecordReceiver`], created
//! from the directional keys the handshake split out. Each keeps its own
//! strictly increasing 64-bit counter; the counter advances only after a
//! successful seal or open, so a failed frame leaves the state unusable by
//! construction (the session must be discarded, per the error contract).

use crate::{frame, TransportError, MAX_PLAINTEXT};
use lantern_crypto::aead::{AeadKey, Nonce, TAG_SIZE};
use lantern_crypto::CryptoError;
use tokio::io::{AsyncRead, AsyncWrite};

/// Sealing half of a session.
pub struct RecordSender<W> {
    writer: W,
    key: AeadKey,
    counter: u64,
}

impl<W> RecordSender<W>
where
    W: AsyncWrite + Unpin,
{
    /// Create a sender over a write half with the outbound key.
    #[must_use]
    pub fn new(writer: W, key: AeadKey) -> Self {
        Self {
            writer,
            key,
            counter: 0,
        }
    }

    /// Seal one plaintext into a record and write it.
    ///
    /// # Errors
    ///
    /// [`TransportError::PayloadTooLarge`] for oversized plaintexts,
    /// [`TransportError::Crypto`] on seal failure or counter exhaustion,
    /// [`TransportError::Io`] on socket failure.
    pub async fn send(&mut self, plaintext: &[u8]) -> Result<(), TransportError> {
        if plaintext.len() > MAX_PLAINTEXT {
            return Err(TransportError::PayloadTooLarge {
                len: plaintext.len(),
            });
        }
        let len = (plaintext.len() + TAG_SIZE) as u32;
        let aad = len.to_be_bytes();
        let nonce = Nonce::from_counter(self.counter);
        let sealed = self.key.seal(&nonce, plaintext, &aad)?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(CryptoError::CounterExhausted)?;

        frame::write_frame(&mut self.writer, &sealed).await
    }

    /// Messages sealed so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.counter
    }

    /// Consume the sender, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Opening half of a session.
pub struct RecordReceiver<R> {
    reader: R,
    key: AeadKey,
    counter: u64,
}

impl<R> RecordReceiver<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a receiver over a read half with the inbound key.
    #[must_use]
    pub fn new(reader: R, key: AeadKey) -> Self {
        Self {
            reader,
            key,
            counter: 0,
        }
    }

    /// Read and open the next record.
    ///
    /// # Errors
    ///
    /// [`TransportError::Crypto`] on authentication failure (including any
    /// replayed or reordered record, which the counter nonce rejects),
    /// [`TransportError::Io`] on socket failure or mid-frame EOF, and the
    /// frame-length errors of [`frame::read_frame`].
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let sealed = frame::read_frame(&mut self.reader).await?;
        let aad = (sealed.len() as u32).to_be_bytes();
        let nonce = Nonce::from_counter(self.counter);
        let plaintext = self.key.open(&nonce, &sealed, &aad)?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(CryptoError::CounterExhausted)?;
        Ok(plaintext)
    }

    /// Messages opened so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.counter
    }
}
