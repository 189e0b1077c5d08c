//! Method names and payload shapes of the peer protocol.

use crate::registry::NodeAttributes;
use peermap_connection::PeerAddress;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;

/// Method asking a node for the peers it knows about.
pub const GET_PEERS: &str = "p2p.peer.getPeers";
/// Method asking a node for its consensus status.
pub const GET_STATUS: &str = "p2p.peer.getStatus";

/// One entry of a peer list response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    /// IP address of the described peer.
    pub address: IpAddr,
    /// Port the peer listens on. Nodes omit it when the peer uses the
    /// network default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Any further facts the responding node shared about the peer.
    #[serde(flatten)]
    pub attributes: NodeAttributes,
}

impl PeerDescriptor {
    /// Create a descriptor carrying nothing but an IP address.
    pub fn new(address: IpAddr) -> Self {
        PeerDescriptor {
            address,
            port: None,
            attributes: NodeAttributes::default(),
        }
    }

    /// Endpoint of the described peer, with `default_port` filling in
    /// when the descriptor does not name one.
    pub fn endpoint(&self, default_port: u16) -> PeerAddress {
        PeerAddress::new(self.address, self.port.unwrap_or(default_port))
    }
}

/// Shape of a consensus status response.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    /// Consensus state of the responding node.
    pub state: NodeState,
    /// Node configuration, including the software version.
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// Consensus state section of a status response.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeState {
    /// Header the node currently considers its chain tip.
    pub header: HeaderSummary,
}

/// Chain tip section of a status response.
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderSummary {
    /// Height of the tip header.
    pub height: u64,
    /// Identifier of the tip header.
    pub id: String,
}

impl StatusResponse {
    /// Distill a status into attribute updates for the registry.
    ///
    /// A string `version` config key becomes the version attribute; any
    /// other config fields carry over as opaque extras.
    pub fn into_attributes(mut self) -> NodeAttributes {
        let version = self
            .config
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_owned);
        if version.is_some() {
            self.config.remove("version");
        }
        NodeAttributes {
            height: Some(self.state.header.height),
            block_id: Some(self.state.header.id),
            version,
            latency: None,
            extra: self.config,
        }
    }
}
