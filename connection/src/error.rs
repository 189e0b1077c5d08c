//! Error types for channel handling.

use std::error::Error;
use std::fmt;
use std::io;

/// Errors that can occur while dialing a peer or exchanging calls on a channel.
#[derive(Debug)]
pub enum ChannelError {
    /// An I/O error occurred during network operations.
    Io(io::Error),
    /// A frame could not be serialized or deserialized as JSON.
    Codec(serde_json::Error),
    /// A peer announced a frame larger than the allowed maximum.
    OversizedFrame(usize),
    /// The call did not complete within the configured budget.
    TimedOut,
    /// The peer answered the call with an error payload.
    Remote(String),
    /// The channel was abandoned after an earlier timeout or I/O failure.
    ///
    /// Once a call is cut off mid-frame the byte stream can no longer be
    /// trusted to be on a frame boundary, so subsequent calls fail fast
    /// instead of reading garbage.
    Poisoned,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Io(err) => write!(f, "Channel I/O error: {err}"),
            ChannelError::Codec(err) => write!(f, "Channel frame codec error: {err}"),
            ChannelError::OversizedFrame(len) => {
                write!(f, "Peer announced an oversized frame of {len} bytes")
            }
            ChannelError::TimedOut => write!(f, "Call timed out"),
            ChannelError::Remote(message) => write!(f, "Peer returned an error: {message}"),
            ChannelError::Poisoned => {
                write!(f, "Channel abandoned after an earlier timeout or I/O failure")
            }
        }
    }
}

impl Error for ChannelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChannelError::Io(err) => Some(err),
            ChannelError::Codec(err) => Some(err),
            ChannelError::OversizedFrame(_) => None,
            ChannelError::TimedOut => None,
            ChannelError::Remote(_) => None,
            ChannelError::Poisoned => None,
        }
    }
}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        ChannelError::Io(err)
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::Codec(err)
    }
}
