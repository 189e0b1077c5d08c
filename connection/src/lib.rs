mod address;
mod channel;
mod codec;
mod envelope;
mod error;
mod pool;

pub use address::PeerAddress;
pub use channel::{Channel, TcpChannel};
pub use codec::{encode_frame, FrameReader, FrameWriter, MAX_FRAME_SIZE};
pub use envelope::{RequestEnvelope, RequestFrame, ResponseFrame};
pub use error::ChannelError;
pub use pool::{
    ConnectionPool, PoolConfig, PooledChannel, DEFAULT_CALL_TIMEOUT, DEFAULT_CONNECT_TIMEOUT,
};
