// ABOUTME: Length-prefixed framing over any duplex byte stream.
// ABOUTME: Frame = [u32 big-endian length][JSON envelope]; raw byte reads/writes for the handshake.
//!
//! ```text
//! +--------+--------+--------+--------+-- ... --+
//! | Length (4 bytes, big-endian)      | Payload |
//! +--------+--------+--------+--------+-- ... --+
//! ```

use super::error::TransportError;
use crate::protocol::{Envelope, PROTOCOL_VERSION};
use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Length prefix size
pub const PREFIX_SIZE: usize = 4;

/// Maximum payload size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Zero-length reads tolerated while waiting for a prefix before the pipe counts as closed
const EMPTY_READ_RETRIES: usize = 8;

/// Read half of a framed channel
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read exactly `count` raw, unframed bytes.
    ///
    /// The pipe may deliver the bytes in pieces of any size, so this loops
    /// until the buffer is full.
    pub async fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; count];
        self.fill(&mut buf, false).await?;
        Ok(buf)
    }

    /// Read one complete frame payload
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut prefix = [0u8; PREFIX_SIZE];
        self.fill(&mut prefix, true).await?;

        let length = u32::from_be_bytes(prefix) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(length));
        }

        let mut payload = vec![0u8; length];
        self.fill(&mut payload, false).await?;
        Ok(payload)
    }

    /// Read one frame and decode its envelope body
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> Result<T, TransportError> {
        let payload = self.read_frame().await?;
        let envelope: Envelope<T> =
            serde_json::from_slice(&payload).map_err(TransportError::Decode)?;
        if envelope.v != PROTOCOL_VERSION {
            return Err(TransportError::VersionMismatch {
                local: PROTOCOL_VERSION,
                peer: envelope.v,
            });
        }
        Ok(envelope.msg)
    }

    /// Fill `buf` completely.
    ///
    /// With `at_boundary` set, zero-length reads before the first byte are
    /// retried a few times and then reported as [`TransportError::Closed`].
    /// Any zero-length read once data has started arriving is a short read.
    async fn fill(&mut self, buf: &mut [u8], at_boundary: bool) -> Result<(), TransportError> {
        let mut filled = 0;
        let mut empty_reads = 0;

        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..]).await?;
            if n == 0 {
                if at_boundary && filled == 0 {
                    empty_reads += 1;
                    if empty_reads > EMPTY_READ_RETRIES {
                        return Err(TransportError::Closed);
                    }
                    tokio::task::yield_now().await;
                    continue;
                }
                return Err(TransportError::ShortRead {
                    expected: buf.len(),
                    received: filled,
                });
            }
            filled += n;
        }
        Ok(())
    }
}

/// Write half of a framed channel
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write raw, unframed bytes and flush
    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write one length-prefixed frame and flush it before returning
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(payload.len()));
        }

        let mut buf = BytesMut::with_capacity(PREFIX_SIZE + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(payload);

        self.write_bytes(&buf).await
    }

    /// Wrap `msg` in a versioned envelope and write it as one frame
    pub async fn write_message<T: Serialize>(&mut self, msg: &T) -> Result<(), TransportError> {
        let payload =
            serde_json::to_vec(&Envelope::new(msg)).map_err(TransportError::Encode)?;
        self.write_frame(&payload).await
    }

    /// Flush and shut down the write direction
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Both halves of a duplex pipe with framing on top
pub struct FramedChannel<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite> FramedChannel<S> {
    pub fn new(stream: S) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read),
            writer: FrameWriter::new(write),
        }
    }

    /// Separate the halves so reading and writing can proceed on different tasks
    pub fn into_split(self) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }

    pub async fn read_message<T: DeserializeOwned>(&mut self) -> Result<T, TransportError> {
        self.reader.read_message().await
    }

    pub async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        self.reader.read_frame().await
    }

    pub async fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        self.reader.read_bytes(count).await
    }

    pub async fn write_message<T: Serialize>(&mut self, msg: &T) -> Result<(), TransportError> {
        self.writer.write_message(msg).await
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.writer.write_frame(payload).await
    }

    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.writer.write_bytes(bytes).await
    }

    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await
    }
}
