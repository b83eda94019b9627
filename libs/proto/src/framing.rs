//! Length-prefixed framing over a stream socket.
//!
//! Frame layout: a 4-byte big-endian payload length, then the payload.
//! The reader accumulates with `read_exact` until the full framed length
//! has been observed, so a payload split across arbitrarily many TCP
//! segments is reassembled correctly. The length bound is enforced before
//! the body is read.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Acknowledgment token written by the receiver after a complete frame.
pub const ACK: &[u8; 2] = b"ok";

/// Upper bound on a framed payload. Manifests are small; anything larger
/// is a broken or hostile peer.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Errors from the transport layer: framing, socket I/O, and the
/// acknowledgment handshake.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connect to {addr} timed out after {timeout_ms}ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("read deadline exceeded")]
    ReadTimeout,

    #[error("frame length {len} exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("zero-length frame")]
    EmptyFrame,

    #[error("acknowledgment mismatch: expected {expected:?}, got {got:?}")]
    AckMismatch { expected: String, got: String },
}

/// Write one framed payload.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Err(TransportError::EmptyFrame);
    }
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let len = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len).await.map_err(TransportError::Write)?;
    writer
        .write_all(payload)
        .await
        .map_err(TransportError::Write)?;
    writer.flush().await.map_err(TransportError::Write)?;

    Ok(())
}

/// Read one framed payload, accumulating until the full framed length has
/// arrived. Callers bound the whole call with a deadline.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(TransportError::Read)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(TransportError::EmptyFrame);
    }
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(TransportError::Read)?;

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(256);

        write_frame(&mut client, b"hello").await.unwrap();
        let payload = read_frame(&mut server).await.unwrap();
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn test_frame_reassembled_from_partial_writes() {
        let (mut client, mut server) = tokio::io::duplex(4);

        let payload = b"a payload well beyond one duplex buffer".to_vec();
        let writer = tokio::spawn({
            let payload = payload.clone();
            async move {
                // The 4-byte duplex buffer forces the frame across many
                // small transfers; the reader must accumulate.
                write_frame(&mut client, &payload).await.unwrap();
            }
        });

        let read = read_frame(&mut server).await.unwrap();
        assert_eq!(read, payload);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_before_body() {
        let (mut client, mut server) = tokio::io::duplex(256);

        let len = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut client, &len)
            .await
            .unwrap();

        // No body ever arrives; the length check alone must fail the read.
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_zero_length_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(256);

        tokio::io::AsyncWriteExt::write_all(&mut client, &0u32.to_be_bytes())
            .await
            .unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, TransportError::EmptyFrame));
    }

    #[tokio::test]
    async fn test_write_rejects_oversized_payload() {
        let (mut client, _server) = tokio::io::duplex(256);

        let payload = vec![0u8; MAX_FRAME_LEN + 1];
        let err = write_frame(&mut client, &payload).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_a_read_error() {
        let (mut client, mut server) = tokio::io::duplex(256);

        tokio::io::AsyncWriteExt::write_all(&mut client, &100u32.to_be_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, b"short")
            .await
            .unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, TransportError::Read(_)));
    }
}
