//! Raw length-prefixed framing.
//!
//! Used directly (without encryption) for the three handshake messages;
//! the record layer wraps the same framing around sealed bytes afterwards.

use crate::{TransportError, MAX_FRAME};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write one `[u32 BE length][bytes]` frame and flush.
///
/// # Errors
///
/// Returns [`TransportError::EmptyFrame`] / [`TransportError::FrameTooLarge`]
/// for out-of-range payloads and [`TransportError::Io`] on socket failure.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Err(TransportError::EmptyFrame);
    }
    if payload.len() > MAX_FRAME {
        return Err(TransportError::FrameTooLarge {
            len: payload.len() as u32,
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one `[u32 BE length][bytes]` frame.
///
/// # Errors
///
/// Returns [`TransportError::EmptyFrame`] / [`TransportError::FrameTooLarge`]
/// for out-of-range lengths and [`TransportError::Io`] on socket failure or
/// a stream that ends mid-frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
        return Err(TransportError::EmptyFrame);
    }
    if len as usize > MAX_FRAME {
        return Err(TransportError::FrameTooLarge { len });
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
