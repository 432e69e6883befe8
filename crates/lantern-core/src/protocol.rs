//! Typed message codec.
//!
//! Every record plaintext is one typed message:
//!
//! ```text
//!  0                   4    5
//! +--------------------+-----+---------------------------+
//! | payload_len (u32)  |kind |   payload bytes           |
//! +--------------------+-----+---------------------------+
//! ```
//!
//! `kind` is a fixed one-byte enumeration; payloads are `bincode`-encoded
//! structs whose field order is part of the wire contract. The three
//! handshake kinds carry raw Noise message bytes and travel unencrypted
//! inside their frames; everything else rides sealed records.

use lantern_transport::MAX_PAYLOAD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codec violations. Fatal to the session they occur on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The kind byte is not part of the protocol.
    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),

    /// The envelope was too short or its length field inconsistent.
    #[error("truncated or inconsistent message envelope")]
    Truncated,

    /// The payload exceeded the 16 MiB bound.
    #[error("payload of {len} bytes exceeds maximum")]
    PayloadTooLarge {
        /// Offending payload length.
        len: usize,
    },

    /// A handshake-kind message arrived on an established session.
    #[error("handshake message after establishment")]
    UnexpectedHandshake,

    /// The payload did not decode as the declared kind.
    #[error("malformed payload: {0}")]
    Malformed(#[from] bincode::Error),
}

/// On-wire message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Noise message 1 (initiator ephemeral).
    HandshakeInit = 0x01,
    /// Noise message 2 (responder ephemeral, static, payload).
    HandshakeResponse = 0x02,
    /// Noise message 3 (initiator static, payload).
    HandshakeFinal = 0x03,
    /// First sealed record, acknowledging the handshake.
    HandshakeComplete = 0x04,
    /// Keepalive / latency probe.
    Ping = 0x10,
    /// Reply to a ping.
    Pong = 0x11,
    /// Graceful session termination.
    Disconnect = 0x12,
    /// Offer of a file.
    FileAnnounce = 0x20,
    /// Request for a window of chunks.
    FileRequest = 0x21,
    /// One chunk of file data.
    FileChunk = 0x22,
    /// Positive or negative chunk acknowledgement.
    FileChunkAck = 0x23,
    /// Whole-transfer completion notice.
    FileComplete = 0x24,
    /// Whole-transfer cancellation.
    FileCancel = 0x25,
    /// Resume point notice from a restarted receiver.
    FileResume = 0x26,
    /// Clipboard content.
    ClipboardData = 0x30,
    /// Clipboard receipt acknowledgement.
    ClipboardAck = 0x31,
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x01 => MessageKind::HandshakeInit,
            0x02 => MessageKind::HandshakeResponse,
            0x03 => MessageKind::HandshakeFinal,
            0x04 => MessageKind::HandshakeComplete,
            0x10 => MessageKind::Ping,
            0x11 => MessageKind::Pong,
            0x12 => MessageKind::Disconnect,
            0x20 => MessageKind::FileAnnounce,
            0x21 => MessageKind::FileRequest,
            0x22 => MessageKind::FileChunk,
            0x23 => MessageKind::FileChunkAck,
            0x24 => MessageKind::FileComplete,
            0x25 => MessageKind::FileCancel,
            0x26 => MessageKind::FileResume,
            0x30 => MessageKind::ClipboardData,
            0x31 => MessageKind::ClipboardAck,
            other => return Err(ProtocolError::UnknownKind(other)),
        })
    }
}

/// Offer of a file. Field order is normative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnnounce {
    /// 32-hex-char transfer id.
    pub transfer_id: String,
    /// Declared file name (reduced to a single component on placement).
    pub file_name: String,
    /// Declared size in bytes.
    pub file_size: i64,
    /// Whole-file SHA-256; authoritative for verification.
    pub file_hash: [u8; 32],
    /// Chunk size chosen by the deterministic policy.
    pub chunk_size: i32,
    /// Total chunk count.
    pub total_chunks: i64,
    /// Optional MIME type supplied by the host.
    pub mime_type: Option<String>,
}

/// Request for `chunk_count` chunks starting at `first_chunk_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequest {
    /// The transfer being pulled.
    pub transfer_id: String,
    /// First chunk wanted.
    pub first_chunk_index: i64,
    /// How many contiguous chunks to send.
    pub chunk_count: i32,
}

/// One chunk of file data with its own integrity hash.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    /// The transfer this chunk belongs to.
    pub transfer_id: String,
    /// Position of the chunk.
    pub chunk_index: i64,
    /// Chunk bytes (final chunk may be short).
    pub data: Vec<u8>,
    /// SHA-256 over `data`.
    pub chunk_hash: [u8; 32],
}

impl std::fmt::Debug for FileChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChunk")
            .field("transfer_id", &self.transfer_id)
            .field("chunk_index", &self.chunk_index)
            .field("data_len", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// Acknowledgement for a single chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunkAck {
    /// The transfer the chunk belongs to.
    pub transfer_id: String,
    /// The acknowledged chunk.
    pub chunk_index: i64,
    /// `false` requests a resend (hash mismatch on receipt).
    pub success: bool,
}

/// Completion or cancellation notice; used by both `FileComplete` and
/// `FileCancel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatus {
    /// The transfer in question.
    pub transfer_id: String,
    /// Whether the transfer ended well.
    pub success: bool,
    /// Failure detail, if any.
    pub error_message: Option<String>,
}

/// Resume point announced by a restarted receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResume {
    /// The transfer being resumed.
    pub transfer_id: String,
    /// Last chunk the receiver holds contiguously.
    pub last_received_chunk: i64,
}

/// Latency probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Sender's clock, Unix milliseconds.
    pub timestamp_ms: i64,
    /// Monotonic sequence per session.
    pub sequence: i64,
}

/// Reply echoing a [`Ping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// The echoed ping timestamp.
    pub ping_timestamp_ms: i64,
    /// The echoed sequence.
    pub sequence: i64,
}

/// Graceful termination notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnect {
    /// Optional human-readable reason.
    pub reason: Option<String>,
}

/// Clipboard content kinds (the `content_type` byte of [`ClipboardData`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClipboardContentType {
    /// UTF-8 text.
    Text = 0,
    /// Encoded image bytes.
    Image = 1,
    /// RTF document.
    Rtf = 2,
    /// HTML fragment.
    Html = 3,
    /// Serialized file list.
    Files = 4,
}

impl TryFrom<u8> for ClipboardContentType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0 => ClipboardContentType::Text,
            1 => ClipboardContentType::Image,
            2 => ClipboardContentType::Rtf,
            3 => ClipboardContentType::Html,
            4 => ClipboardContentType::Files,
            other => return Err(ProtocolError::UnknownKind(other)),
        })
    }
}

/// Clipboard content in transit. Capture and injection are host concerns;
/// the core only transports the bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardData {
    /// Random id for acknowledgement matching.
    pub clipboard_id: String,
    /// A [`ClipboardContentType`] value.
    pub content_type: u8,
    /// Raw clipboard bytes.
    pub data: Vec<u8>,
    /// Capture time, Unix milliseconds.
    pub timestamp_ms: i64,
}

impl std::fmt::Debug for ClipboardData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipboardData")
            .field("clipboard_id", &self.clipboard_id)
            .field("content_type", &self.content_type)
            .field("data_len", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// Clipboard receipt acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardAck {
    /// The acknowledged clipboard id.
    pub clipboard_id: String,
}

/// A decoded typed message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Noise message 1, raw bytes.
    HandshakeInit(Vec<u8>),
    /// Noise message 2, raw bytes.
    HandshakeResponse(Vec<u8>),
    /// Noise message 3, raw bytes.
    HandshakeFinal(Vec<u8>),
    /// Empty application-level handshake acknowledgement.
    HandshakeComplete,
    /// Latency probe.
    Ping(Ping),
    /// Probe reply.
    Pong(Pong),
    /// Graceful termination.
    Disconnect(Disconnect),
    /// File offer.
    FileAnnounce(FileAnnounce),
    /// Chunk window request.
    FileRequest(FileRequest),
    /// Chunk data.
    FileChunk(FileChunk),
    /// Chunk acknowledgement.
    FileChunkAck(FileChunkAck),
    /// Transfer completion notice.
    FileComplete(TransferStatus),
    /// Transfer cancellation.
    FileCancel(TransferStatus),
    /// Resume notice.
    FileResume(FileResume),
    /// Clipboard content.
    ClipboardData(ClipboardData),
    /// Clipboard acknowledgement.
    ClipboardAck(ClipboardAck),
}

impl Message {
    /// The kind byte for this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::HandshakeInit(_) => MessageKind::HandshakeInit,
            Message::HandshakeResponse(_) => MessageKind::HandshakeResponse,
            Message::HandshakeFinal(_) => MessageKind::HandshakeFinal,
            Message::HandshakeComplete => MessageKind::HandshakeComplete,
            Message::Ping(_) => MessageKind::Ping,
            Message::Pong(_) => MessageKind::Pong,
            Message::Disconnect(_) => MessageKind::Disconnect,
            Message::FileAnnounce(_) => MessageKind::FileAnnounce,
            Message::FileRequest(_) => MessageKind::FileRequest,
            Message::FileChunk(_) => MessageKind::FileChunk,
            Message::FileChunkAck(_) => MessageKind::FileChunkAck,
            Message::FileComplete(_) => MessageKind::FileComplete,
            Message::FileCancel(_) => MessageKind::FileCancel,
            Message::FileResume(_) => MessageKind::FileResume,
            Message::ClipboardData(_) => MessageKind::ClipboardData,
            Message::ClipboardAck(_) => MessageKind::ClipboardAck,
        }
    }

    /// Encode into `[payload_len u32 BE][kind u8][payload]`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] past the 16 MiB bound or
    /// [`ProtocolError::Malformed`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = match self {
            Message::HandshakeInit(bytes)
            | Message::HandshakeResponse(bytes)
            | Message::HandshakeFinal(bytes) => bytes.clone(),
            Message::HandshakeComplete => Vec::new(),
            Message::Ping(p) => bincode::serialize(p)?,
            Message::Pong(p) => bincode::serialize(p)?,
            Message::Disconnect(p) => bincode::serialize(p)?,
            Message::FileAnnounce(p) => bincode::serialize(p)?,
            Message::FileRequest(p) => bincode::serialize(p)?,
            Message::FileChunk(p) => bincode::serialize(p)?,
            Message::FileChunkAck(p) => bincode::serialize(p)?,
            Message::FileComplete(p) | Message::FileCancel(p) => bincode::serialize(p)?,
            Message::FileResume(p) => bincode::serialize(p)?,
            Message::ClipboardData(p) => bincode::serialize(p)?,
            Message::ClipboardAck(p) => bincode::serialize(p)?,
        };
        if payload.len() > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload.len(),
            });
        }

        let mut out = Vec::with_capacity(5 + payload.len());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.push(self.kind() as u8);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode from `[payload_len u32 BE][kind u8][payload]`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] on envelope inconsistencies,
    /// [`ProtocolError::UnknownKind`] for unassigned kind bytes,
    /// [`ProtocolError::PayloadTooLarge`] past the 16 MiB bound, and
    /// [`ProtocolError::Malformed`] when the payload does not parse.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < 5 {
            return Err(ProtocolError::Truncated);
        }
        let declared = u32::from_be_bytes(bytes[..4].try_into().expect("length checked")) as usize;
        if declared > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge { len: declared });
        }
        if declared != bytes.len() - 5 {
            return Err(ProtocolError::Truncated);
        }
        let kind = MessageKind::try_from(bytes[4])?;
        let payload = &bytes[5..];

        Ok(match kind {
            MessageKind::HandshakeInit => Message::HandshakeInit(payload.to_vec()),
            MessageKind::HandshakeResponse => Message::HandshakeResponse(payload.to_vec()),
            MessageKind::HandshakeFinal => Message::HandshakeFinal(payload.to_vec()),
            MessageKind::HandshakeComplete => Message::HandshakeComplete,
            MessageKind::Ping => Message::Ping(bincode::deserialize(payload)?),
            MessageKind::Pong => Message::Pong(bincode::deserialize(payload)?),
            MessageKind::Disconnect => Message::Disconnect(bincode::deserialize(payload)?),
            MessageKind::FileAnnounce => Message::FileAnnounce(bincode::deserialize(payload)?),
            MessageKind::FileRequest => Message::FileRequest(bincode::deserialize(payload)?),
            MessageKind::FileChunk => Message::FileChunk(bincode::deserialize(payload)?),
            MessageKind::FileChunkAck => Message::FileChunkAck(bincode::deserialize(payload)?),
            MessageKind::FileComplete => Message::FileComplete(bincode::deserialize(payload)?),
            MessageKind::FileCancel => Message::FileCancel(bincode::deserialize(payload)?),
            MessageKind::FileResume => Message::FileResume(bincode::deserialize(payload)?),
            MessageKind::ClipboardData => Message::ClipboardData(bincode::deserialize(payload)?),
            MessageKind::ClipboardAck => Message::ClipboardAck(bincode::deserialize(payload)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_kind_values_are_normative() {
        assert_eq!(MessageKind::HandshakeInit as u8, 0x01);
        assert_eq!(MessageKind::HandshakeResponse as u8, 0x02);
        assert_eq!(MessageKind::HandshakeFinal as u8, 0x03);
        assert_eq!(MessageKind::HandshakeComplete as u8, 0x04);
        assert_eq!(MessageKind::Ping as u8, 0x10);
        assert_eq!(MessageKind::Pong as u8, 0x11);
        assert_eq!(MessageKind::Disconnect as u8, 0x12);
        assert_eq!(MessageKind::FileAnnounce as u8, 0x20);
        assert_eq!(MessageKind::FileRequest as u8, 0x21);
        assert_eq!(MessageKind::FileChunk as u8, 0x22);
        assert_eq!(MessageKind::FileChunkAck as u8, 0x23);
        assert_eq!(MessageKind::FileComplete as u8, 0x24);
        assert_eq!(MessageKind::FileCancel as u8, 0x25);
        assert_eq!(MessageKind::FileResume as u8, 0x26);
        assert_eq!(MessageKind::ClipboardData as u8, 0x30);
        assert_eq!(MessageKind::ClipboardAck as u8, 0x31);
    }

    #[test]
    fn test_announce_roundtrip() {
        let msg = Message::FileAnnounce(FileAnnounce {
            transfer_id: "a".repeat(32),
            file_name: "report.pdf".into(),
            file_size: 1_048_576,
            file_hash: [7u8; 32],
            chunk_size: 65_536,
            total_chunks: 16,
            mime_type: Some("application/pdf".into()),
        });
        let encoded = msg.encode().unwrap();
        assert_eq!(encoded[4], 0x20);
        assert_eq!(Message::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_chunk_roundtrip() {
        let msg = Message::FileChunk(FileChunk {
            transfer_id: "b".repeat(32),
            chunk_index: 42,
            data: vec![0xAB; 1024],
            chunk_hash: [3u8; 32],
        });
        let encoded = msg.encode().unwrap();
        assert_eq!(Message::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_handshake_complete_is_empty() {
        let encoded = Message::HandshakeComplete.encode().unwrap();
        assert_eq!(encoded.len(), 5);
        assert_eq!(&encoded[..4], &[0, 0, 0, 0]);
        assert_eq!(encoded[4], 0x04);
        assert_eq!(Message::decode(&encoded).unwrap(), Message::HandshakeComplete);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut encoded = Message::HandshakeComplete.encode().unwrap();
        encoded[4] = 0xEE;
        assert!(matches!(
            Message::decode(&encoded),
            Err(ProtocolError::UnknownKind(0xEE))
        ));
    }

    #[test]
    fn test_inconsistent_length_rejected() {
        let mut encoded = Message::Ping(Ping {
            timestamp_ms: 1,
            sequence: 2,
        })
        .encode()
        .unwrap();
        encoded[3] ^= 0x01;
        assert!(matches!(
            Message::decode(&encoded),
            Err(ProtocolError::Truncated)
        ));
    }

    #[test]
    fn test_short_input_rejected() {
        assert!(matches!(
            Message::decode(&[0, 0, 0]),
            Err(ProtocolError::Truncated)
        ));
    }

    #[test]
    fn test_oversized_declared_length_rejected() {
        let mut bytes = vec![0u8; 5];
        bytes[..4].copy_from_slice(&(MAX_PAYLOAD as u32 + 1).to_be_bytes());
        bytes[4] = 0x10;
        assert!(matches!(
            Message::decode(&bytes),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_malformed_payload_rejected() {
        // Declares Ping but carries garbage shorter than two i64s.
        let payload = [0xFFu8; 3];
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.push(0x10);
        bytes.extend_from_slice(&payload);
        assert!(matches!(
            Message::decode(&bytes),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_clipboard_content_type_values() {
        assert_eq!(ClipboardContentType::try_from(0).unwrap(), ClipboardContentType::Text);
        assert_eq!(ClipboardContentType::try_from(4).unwrap(), ClipboardContentType::Files);
        assert!(ClipboardContentType::try_from(5).is_err());
    }

    proptest! {
        #[test]
        fn prop_ping_pong_roundtrip(ts in any::<i64>(), seq in any::<i64>()) {
            let ping = Message::Ping(Ping { timestamp_ms: ts, sequence: seq });
            prop_assert_eq!(Message::decode(&ping.encode().unwrap()).unwrap(), ping);

            let pong = Message::Pong(Pong { ping_timestamp_ms: ts, sequence: seq });
            prop_assert_eq!(Message::decode(&pong.encode().unwrap()).unwrap(), pong);
        }

        #[test]
        fn prop_chunk_ack_roundtrip(idx in 0i64..1_000_000, success in any::<bool>()) {
            let msg = Message::FileChunkAck(FileChunkAck {
                transfer_id: "c".repeat(32),
                chunk_index: idx,
                success,
            });
            prop_assert_eq!(Message::decode(&msg.encode().unwrap()).unwrap(), msg);
        }
    }
}
