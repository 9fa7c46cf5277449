//! Message Framing Codec
//!
//! Every message, in both directions, is carried in the same envelope:
//!
//! ```text
//! [length: u32 BE][reserved: u32][payload: length bytes]
//! ```
//!
//! Decoding is read-fully-or-fail. A short read, EOF or socket error on any
//! field is a framing error, and the caller tears the session down. A declared
//! length above [`MAX_MESSAGE_LENGTH`] is rejected before any payload buffer is
//! allocated; the stream is not drained.

use std::future::Future;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, error};

use crate::error::FramingError;

/// Largest payload accepted from the peer
pub const MAX_MESSAGE_LENGTH: usize = 100_000;

/// Length + reserved
pub const HEADER_LEN: usize = 8;

/// One decoded envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Received reserved word; logged, never validated
    pub reserved: u32,
    pub payload: Vec<u8>,
}

/// Run an I/O step under an optional deadline
async fn bounded<T, F>(
    io_timeout: Option<Duration>,
    what: &'static str,
    fut: F,
) -> Result<T, FramingError>
where
    F: Future<Output = Result<T, FramingError>>,
{
    match io_timeout {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| FramingError::Timeout(what))?,
        None => fut.await,
    }
}

async fn read_u32<R>(reader: &mut R, field: &'static str) -> Result<u32, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut word = [0u8; 4];
    reader
        .read_exact(&mut word)
        .await
        .map_err(|source| FramingError::Truncated { field, source })?;
    Ok(u32::from_be_bytes(word))
}

/// Read exactly one frame
///
/// `io_timeout` bounds the whole read; `None` blocks until the peer delivers
/// or closes.
pub async fn read_frame<R>(
    reader: &mut R,
    io_timeout: Option<Duration>,
) -> Result<Frame, FramingError>
where
    R: AsyncRead + Unpin,
{
    bounded(io_timeout, "read", async {
        let length = read_u32(reader, "length").await? as usize;
        let reserved = read_u32(reader, "reserved").await?;

        if length > MAX_MESSAGE_LENGTH {
            error!(length, max = MAX_MESSAGE_LENGTH, "Frame too large");
            return Err(FramingError::Oversized {
                length,
                max: MAX_MESSAGE_LENGTH,
            });
        }

        let mut payload = vec![0u8; length];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|source| FramingError::Truncated {
                field: "payload",
                source,
            })?;

        debug!(length, reserved, "Frame RX");
        Ok(Frame { reserved, payload })
    })
    .await
}

/// Build the wire bytes for one payload
pub fn encode_frame(payload: &[u8]) -> Result<BytesMut, FramingError> {
    let length =
        u32::try_from(payload.len()).map_err(|_| FramingError::PayloadTooLarge(payload.len()))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(length);
    buf.put_u32(0);
    buf.put_slice(payload);
    Ok(buf)
}

/// Write one payload as a frame; any short or failed write is fatal
pub async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
    io_timeout: Option<Duration>,
) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    bounded(io_timeout, "write", async {
        writer.write_all(&frame).await.map_err(FramingError::Send)?;
        writer.flush().await.map_err(FramingError::Send)?;
        debug!(length = payload.len(), "Frame TX");
        Ok(())
    })
    .await
}
