//! Network communication layer.
//!
//! [`Framer`] reads complete frames off a byte stream. [`client`] resolves
//! a node, borrows a pooled connection and performs one request/response
//! exchange. [`server`] listens, accepts and runs one worker per
//! connection.

pub mod client;
pub mod server;

pub use client::{ClientTransport, ClientTransportOptions};
pub use server::{ServerTransport, ServerTransportOptions};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::frame::{FRAME_HEAD_LEN, MAGIC, MAX_PAYLOAD_LENGTH};
use crate::error::{NovaError, Result};

/// Initial framer buffer capacity.
const DEFAULT_PAYLOAD_LENGTH: usize = 1024;

/// Doublings allowed from the initial capacity. 1 KiB doubled twelve
/// times reaches the 4 MiB payload ceiling, so any valid frame fits.
const MAX_RESIZE_COUNT: usize = 12;

/// Reads one complete frame at a time from a byte stream.
///
/// A framer is owned by a single connection; `read_frame` is never called
/// concurrently on the same framer. The internal buffer grows by doubling
/// and is reused across frames.
pub struct Framer {
    buffer: Vec<u8>,
    resize_count: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buffer: vec![0; DEFAULT_PAYLOAD_LENGTH],
            resize_count: 0,
        }
    }

    /// Read one complete frame (header + body).
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames. EOF in
    /// the middle of a frame is an error: the peer went away mid-message.
    /// A bad magic byte or an oversized length also fail; the stream is
    /// desynchronized at that point and the caller must close it.
    pub async fn read_frame<S>(&mut self, stream: &mut S) -> Result<Option<Vec<u8>>>
    where
        S: AsyncRead + Unpin,
    {
        let mut header = [0u8; FRAME_HEAD_LEN];
        let mut filled = 0;
        while filled < FRAME_HEAD_LEN {
            let n = stream.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(NovaError::ConnectionClosed);
            }
            filled += n;
        }

        if header[0] != MAGIC {
            return Err(NovaError::client_msg("invalid magic"));
        }

        let length = u32::from_be_bytes([header[7], header[8], header[9], header[10]]);
        if length > MAX_PAYLOAD_LENGTH {
            return Err(NovaError::client_msg("payload too large"));
        }

        while self.buffer.len() < length as usize {
            if self.resize_count >= MAX_RESIZE_COUNT {
                return Err(NovaError::client_msg("frame buffer limit reached"));
            }
            self.buffer.resize(self.buffer.len() * 2, 0);
            self.resize_count += 1;
        }

        let body = &mut self.buffer[..length as usize];
        stream.read_exact(body).await?;

        let mut frame = Vec::with_capacity(FRAME_HEAD_LEN + length as usize);
        frame.extend_from_slice(&header);
        frame.extend_from_slice(body);
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::frame::{encode_frame, FrameHeader};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_one_complete_frame() {
        let (mut tx, mut rx) = tokio::io::duplex(64 * 1024);
        let frame = encode_frame(b"hello").unwrap();
        tx.write_all(&frame).await.unwrap();

        let mut framer = Framer::new();
        let read = framer.read_frame(&mut rx).await.unwrap().unwrap();
        assert_eq!(read, frame);
    }

    #[tokio::test]
    async fn reads_frames_back_to_back() {
        let (mut tx, mut rx) = tokio::io::duplex(64 * 1024);
        let first = encode_frame(b"first").unwrap();
        let second = encode_frame(b"second").unwrap();
        tx.write_all(&first).await.unwrap();
        tx.write_all(&second).await.unwrap();

        let mut framer = Framer::new();
        assert_eq!(framer.read_frame(&mut rx).await.unwrap().unwrap(), first);
        assert_eq!(framer.read_frame(&mut rx).await.unwrap().unwrap(), second);
    }

    #[tokio::test]
    async fn clean_eof_between_frames_is_end_of_stream() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        let frame = encode_frame(b"only").unwrap();
        tx.write_all(&frame).await.unwrap();
        drop(tx);

        let mut framer = Framer::new();
        assert!(framer.read_frame(&mut rx).await.unwrap().is_some());
        assert!(framer.read_frame(&mut rx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_header_is_an_error() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        tx.write_all(&[MAGIC, 0, 0, 0, 0]).await.unwrap();
        drop(tx);

        let mut framer = Framer::new();
        assert!(framer.read_frame(&mut rx).await.is_err());
    }

    #[tokio::test]
    async fn eof_mid_body_is_an_error() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        let frame = encode_frame(b"truncated body").unwrap();
        tx.write_all(&frame[..frame.len() - 3]).await.unwrap();
        drop(tx);

        let mut framer = Framer::new();
        assert!(framer.read_frame(&mut rx).await.is_err());
    }

    #[tokio::test]
    async fn bad_magic_fails_immediately() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        let mut frame = encode_frame(b"body").unwrap();
        frame[0] = 0x00;
        tx.write_all(&frame).await.unwrap();

        let mut framer = Framer::new();
        let err = framer.read_frame(&mut rx).await.unwrap_err();
        assert!(err.to_string().contains("invalid magic"));
    }

    #[tokio::test]
    async fn oversized_length_fails_without_reading_body() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        let header = FrameHeader {
            length: MAX_PAYLOAD_LENGTH + 1,
            ..FrameHeader::general(0)
        };
        tx.write_all(&header.encode()).await.unwrap();

        let mut framer = Framer::new();
        let err = framer.read_frame(&mut rx).await.unwrap_err();
        assert!(err.to_string().contains("payload too large"));
    }

    #[tokio::test]
    async fn fragmented_delivery_still_yields_one_frame() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        let frame = encode_frame(b"arrives in three pieces").unwrap();

        let pieces: Vec<Vec<u8>> = vec![
            frame[..7].to_vec(),
            frame[7..FRAME_HEAD_LEN + 4].to_vec(),
            frame[FRAME_HEAD_LEN + 4..].to_vec(),
        ];
        let expected = frame.clone();
        tokio::spawn(async move {
            for piece in pieces {
                tx.write_all(&piece).await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        });

        let mut framer = Framer::new();
        let read = framer.read_frame(&mut rx).await.unwrap().unwrap();
        assert_eq!(read, expected);
    }

    #[tokio::test]
    async fn buffer_grows_for_large_frames() {
        let (mut tx, mut rx) = tokio::io::duplex(256 * 1024);
        let body = vec![0xCD; 100 * 1024];
        let frame = encode_frame(&body).unwrap();

        let to_send = frame.clone();
        tokio::spawn(async move {
            tx.write_all(&to_send).await.unwrap();
        });

        let mut framer = Framer::new();
        let read = framer.read_frame(&mut rx).await.unwrap().unwrap();
        assert_eq!(read.len(), frame.len());
        assert_eq!(&read[FRAME_HEAD_LEN..], body.as_slice());
    }
}
