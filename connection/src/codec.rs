//! Length-delimited JSON framing.
//!
//! Every frame is a 4-byte big-endian payload length followed by one JSON
//! document. The reader tracks its progress across partial reads, so a read
//! future that is dropped mid-frame (a timed-out call) leaves the framing
//! state intact and the next read resumes where the last one stopped.

use crate::error::ChannelError;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the frame length prefix in bytes.
const LENGTH_PREFIX_SIZE: usize = 4;

/// Upper bound on a single frame's payload.
///
/// Peer lists for large networks run to a few hundred kilobytes; anything
/// bigger than this is a misbehaving peer, not a real payload.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// State machine for the [`FrameReader`] read method, tracking progress
/// across partial reads and interruptions.
#[derive(Debug)]
enum ReceiveState {
    /// Reading the 4-byte length prefix.
    ReadingLength {
        prefix: [u8; LENGTH_PREFIX_SIZE],
        bytes_read: usize,
    },
    /// Reading the JSON payload.
    ReadingPayload { buffer: Vec<u8>, bytes_read: usize },
}

impl ReceiveState {
    /// Initialize a new state for reading the length prefix.
    fn reading_length() -> Self {
        ReceiveState::ReadingLength {
            prefix: [0u8; LENGTH_PREFIX_SIZE],
            bytes_read: 0,
        }
    }

    /// Transition to reading a payload of the announced length.
    fn reading_payload(payload_len: usize) -> Self {
        ReceiveState::ReadingPayload {
            buffer: vec![0u8; payload_len],
            bytes_read: 0,
        }
    }
}

/// Writes length-delimited JSON frames to the underlying writer.
#[derive(Debug)]
pub struct FrameWriter<W> {
    /// The IO writer.
    writer: W,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Create a new frame writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize one frame and write it with its length prefix.
    pub async fn write<T: Serialize>(&mut self, frame: &T) -> Result<(), ChannelError> {
        let payload = serde_json::to_vec(frame)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(ChannelError::OversizedFrame(payload.len()));
        }

        let prefix = (payload.len() as u32).to_be_bytes();
        self.writer.write_all(&prefix).await?;
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Shut down the underlying writer, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> Result<(), ChannelError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Reads length-delimited JSON frames from the underlying reader.
#[derive(Debug)]
pub struct FrameReader<R> {
    /// Current state of the receive operation.
    receive_state: ReceiveState,
    /// The IO reader.
    reader: R,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create a new frame reader.
    pub fn new(reader: R) -> Self {
        Self {
            receive_state: ReceiveState::reading_length(),
            reader,
        }
    }

    /// Read one frame and return its raw payload bytes.
    ///
    /// Dropping the returned future between polls does not lose partially
    /// read data; a later call resumes the same frame.
    pub async fn read(&mut self) -> Result<Vec<u8>, ChannelError> {
        loop {
            match &mut self.receive_state {
                ReceiveState::ReadingLength { prefix, bytes_read } => {
                    while *bytes_read < LENGTH_PREFIX_SIZE {
                        let n = self.reader.read(&mut prefix[*bytes_read..]).await?;
                        if n == 0 {
                            return Err(ChannelError::Io(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "connection closed while reading frame length",
                            )));
                        }
                        *bytes_read += n;
                    }

                    let payload_len = u32::from_be_bytes(*prefix) as usize;
                    if payload_len > MAX_FRAME_SIZE {
                        return Err(ChannelError::OversizedFrame(payload_len));
                    }

                    self.receive_state = ReceiveState::reading_payload(payload_len);
                }

                ReceiveState::ReadingPayload { buffer, bytes_read } => {
                    while *bytes_read < buffer.len() {
                        let n = self.reader.read(&mut buffer[*bytes_read..]).await?;
                        if n == 0 {
                            return Err(ChannelError::Io(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "connection closed while reading frame payload",
                            )));
                        }
                        *bytes_read += n;
                    }

                    let payload = std::mem::take(buffer);
                    self.receive_state = ReceiveState::reading_length();
                    return Ok(payload);
                }
            }
        }
    }
}

/// Serialize a frame into its full wire form, length prefix included.
///
/// Servers and tests use this to build frames without a [`FrameWriter`].
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<Vec<u8>, ChannelError> {
    let payload = serde_json::to_vec(frame)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ChannelError::OversizedFrame(payload.len()));
    }
    let mut wire = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    wire.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    wire.extend_from_slice(&payload);
    Ok(wire)
}
