//! Call/response channels to a single peer.
//!
//! A [`Channel`] owns one framed byte stream and exposes exactly one
//! operation: issue a method call and await the peer's response. Channels are
//! generic over their reader and writer so tests can drive them with in-memory
//! streams; [`TcpChannel`] is the specialization used against real peers.

use crate::address::PeerAddress;
use crate::codec::{FrameReader, FrameWriter};
use crate::envelope::{RequestEnvelope, RequestFrame, ResponseFrame};
use crate::error::ChannelError;
use log::debug;
use serde_json::Value;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A call/response channel to one peer.
///
/// A channel supports a single in-flight call at a time; the per-call budget
/// is enforced here with [`tokio::time::timeout`]. Response frames that do
/// not answer the outstanding request (late responses to a call that already
/// timed out) are discarded by correlation id.
#[derive(Debug)]
pub struct Channel<R, W> {
    /// The peer on the other end.
    address: PeerAddress,
    /// Framed receive half.
    reader: FrameReader<R>,
    /// Framed send half.
    writer: FrameWriter<W>,
    /// Budget for one complete call, write through response.
    call_timeout: Duration,
    /// Correlation id for the next request.
    next_id: u64,
    /// Set once the current request frame has been fully written, so a
    /// timeout can distinguish a safe mid-read interruption from a
    /// corrupting mid-write one.
    request_written: bool,
    /// Set when the byte stream can no longer be trusted to sit on a frame
    /// boundary; all further calls fail fast.
    poisoned: bool,
}

impl<R, W> Channel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a channel over an established byte stream.
    pub fn new(address: PeerAddress, reader: R, writer: W, call_timeout: Duration) -> Self {
        Channel {
            address,
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            call_timeout,
            next_id: 1,
            request_written: false,
            poisoned: false,
        }
    }

    /// The peer this channel is connected to.
    pub fn address(&self) -> PeerAddress {
        self.address
    }

    /// Issue one remote call and await its response payload.
    ///
    /// # Arguments
    ///
    /// * `method` - Method name, e.g. `p2p.peer.getPeers`.
    /// * `request` - Envelope of arguments and headers.
    ///
    /// # Returns
    ///
    /// The response payload, [`Value::Null`] when the peer answered without
    /// one, or the error the call failed with. Timeouts and I/O failures are
    /// reported as [`ChannelError::TimedOut`] and [`ChannelError::Io`].
    pub async fn call(
        &mut self,
        method: &str,
        request: &RequestEnvelope,
    ) -> Result<Value, ChannelError> {
        if self.poisoned {
            return Err(ChannelError::Poisoned);
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.request_written = false;
        let frame = RequestFrame::new(id, method, request.clone());

        match tokio::time::timeout(self.call_timeout, self.exchange(id, &frame)).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(err)) => {
                if matches!(
                    err,
                    ChannelError::Io(_) | ChannelError::OversizedFrame(_)
                ) {
                    self.poisoned = true;
                }
                Err(err)
            }
            Err(_) => {
                // A timeout mid-write leaves a partial request frame on the
                // stream. A timeout mid-read is recoverable: the frame reader
                // resumes where it stopped and the late response is discarded
                // by id on the next call.
                if !self.request_written {
                    self.poisoned = true;
                }
                Err(ChannelError::TimedOut)
            }
        }
    }

    /// Write the request frame and read frames until the matching response.
    async fn exchange(&mut self, id: u64, frame: &RequestFrame) -> Result<Value, ChannelError> {
        self.writer.write(frame).await?;
        self.request_written = true;

        loop {
            let payload = self.reader.read().await?;
            let response: ResponseFrame = serde_json::from_slice(&payload)?;
            if response.id != id {
                debug!(
                    "discarding stale response {} from {}",
                    response.id, self.address
                );
                continue;
            }
            return match response.error {
                Some(message) => Err(ChannelError::Remote(message)),
                None => Ok(response.data.unwrap_or(Value::Null)),
            };
        }
    }

    /// Shut down the send half, signalling EOF to the peer.
    pub async fn close(&mut self) -> Result<(), ChannelError> {
        self.writer.shutdown().await
    }
}

/// A TCP-based channel to a peer.
///
/// This is a convenience type alias for [`Channel`] with Tokio's TCP stream halves.
pub type TcpChannel = Channel<BufReader<OwnedReadHalf>, OwnedWriteHalf>;

impl TcpChannel {
    /// Dial a peer over TCP and wrap the stream in a channel.
    ///
    /// # Arguments
    ///
    /// * `address` - The peer to dial.
    /// * `connect_timeout` - Budget for establishing the TCP connection.
    /// * `call_timeout` - Budget applied to each subsequent call.
    pub async fn connect(
        address: PeerAddress,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<TcpChannel, ChannelError> {
        let stream =
            match tokio::time::timeout(connect_timeout, TcpStream::connect(address.socket_addr()))
                .await
            {
                Ok(Ok(stream)) => {
                    // No delay is helpful for the small frames of the peer API.
                    stream.set_nodelay(true)?;
                    stream
                }
                Ok(Err(e)) => return Err(ChannelError::Io(e)),
                Err(_) => {
                    return Err(ChannelError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "Connection attempt timed out",
                    )))
                }
            };

        let (reader, writer) = stream.into_split();
        Ok(Channel::new(
            address,
            BufReader::new(reader),
            writer,
            call_timeout,
        ))
    }
}
