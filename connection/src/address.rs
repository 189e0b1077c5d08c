//! Peer address structures and utilities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Network identity of a peer: the host it answers on and its listening port.
///
/// Addresses order by IP first and port second, which gives registry
/// iteration a stable, deterministic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    /// The peer's IP address.
    pub ip: IpAddr,
    /// The port number the peer is listening on.
    pub port: u16,
}

impl PeerAddress {
    /// Create a new peer address.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        PeerAddress { ip, port }
    }

    /// The address as a dialable socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(socket: SocketAddr) -> Self {
        PeerAddress::new(socket.ip(), socket.port())
    }
}

impl From<PeerAddress> for SocketAddr {
    fn from(address: PeerAddress) -> Self {
        address.socket_addr()
    }
}
