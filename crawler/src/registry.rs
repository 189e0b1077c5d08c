//! Bookkeeping for every node learned about during a crawl.
//!
//! The [`NodeRegistry`] is the single source of truth the crawl phases
//! read from and write to. Nodes are keyed by their [`PeerAddress`] and
//! accumulate facts over time; traversal progress is tracked separately
//! so that discovery visits every node exactly once.

use crate::enrich::Location;
use log::debug;
use peermap_connection::PeerAddress;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Traversal progress of a node within the current crawl.
///
/// Every node starts as [`TraversalState::NotVisited`] and moves to exactly
/// one of the other states when discovery processes it. Once left,
/// `NotVisited` is never entered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalState {
    /// The node is known but has not been asked for its peers yet.
    NotVisited,
    /// The node answered a peer list request.
    PeersFetchSucceeded,
    /// The node was reachable but the peer list request failed.
    PeersFetchFailed,
    /// No connection to the node could be established.
    ConnectUnavailable,
}

impl TraversalState {
    /// Whether the state is final for this crawl.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TraversalState::NotVisited)
    }
}

impl fmt::Display for TraversalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraversalState::NotVisited => write!(f, "not-visited"),
            TraversalState::PeersFetchSucceeded => write!(f, "peers-fetch-succeeded"),
            TraversalState::PeersFetchFailed => write!(f, "peers-fetch-failed"),
            TraversalState::ConnectUnavailable => write!(f, "connect-unavailable"),
        }
    }
}

/// Violations of the registry's bookkeeping rules.
///
/// These indicate a bug in the crawl logic rather than a misbehaving
/// node, so they abort the crawl instead of being skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The address has never been registered.
    UnknownAddress(PeerAddress),
    /// A node's traversal state was assigned twice or moved backwards.
    InvalidTransition {
        /// Node whose state was reassigned.
        address: PeerAddress,
        /// State the node was already in.
        from: TraversalState,
        /// State the caller tried to assign.
        to: TraversalState,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::UnknownAddress(address) => {
                write!(f, "Address {address} is not registered")
            }
            RegistryError::InvalidTransition { address, from, to } => {
                write!(f, "Invalid traversal transition for {address}: {from} to {to}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Mutable facts learned about a node as crawl phases report in.
///
/// Every field is optional. Merging overlays present fields and leaves
/// absent ones untouched, so later phases refine rather than erase what
/// earlier phases learned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAttributes {
    /// Best block height the node reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    /// Identifier of the node's best block.
    #[serde(rename = "blockId", skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    /// Software version the node runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Network latency to the node in milliseconds, as reported by the
    /// peers that list it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<u64>,
    /// Any further fields shared about the node.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeAttributes {
    /// Overlay `update` on top of these attributes.
    ///
    /// Fields absent in `update` keep their current value, so no merge
    /// ever deletes a previously learned fact.
    pub fn merge(&mut self, update: &NodeAttributes) {
        if let Some(height) = update.height {
            self.height = Some(height);
        }
        if let Some(block_id) = &update.block_id {
            self.block_id = Some(block_id.clone());
        }
        if let Some(version) = &update.version {
            self.version = Some(version.clone());
        }
        if let Some(latency) = update.latency {
            self.latency = Some(latency);
        }
        for (key, value) in &update.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

/// Everything known about a single node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    /// IP the node is reachable at.
    #[serde(rename = "address")]
    pub ip: IpAddr,
    /// Port the node listens on.
    pub port: u16,
    /// Facts learned about the node so far.
    #[serde(flatten)]
    pub attributes: NodeAttributes,
    /// Geographic information resolved for the address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl NodeRecord {
    fn new(address: PeerAddress) -> Self {
        NodeRecord {
            ip: address.ip,
            port: address.port,
            attributes: NodeAttributes::default(),
            location: None,
        }
    }

    /// Endpoint identity of the node.
    pub fn address(&self) -> PeerAddress {
        PeerAddress::new(self.ip, self.port)
    }
}

/// All nodes known in the current crawl, keyed by address.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<PeerAddress, NodeRecord>,
    traversal: BTreeMap<PeerAddress, TraversalState>,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        NodeRegistry {
            nodes: BTreeMap::new(),
            traversal: BTreeMap::new(),
        }
    }

    /// Make `address` known, folding `attributes` into its record.
    ///
    /// First registration creates the record and marks the node
    /// [`TraversalState::NotVisited`]. Registering an already known
    /// address only merges the attributes and leaves its traversal
    /// state alone.
    ///
    /// # Returns
    ///
    /// `true` if the address was new.
    pub fn register(&mut self, address: PeerAddress, attributes: &NodeAttributes) -> bool {
        let new = !self.nodes.contains_key(&address);
        if new {
            debug!("Discovered node {address}");
            self.traversal.insert(address, TraversalState::NotVisited);
        }
        self.nodes
            .entry(address)
            .or_insert_with(|| NodeRecord::new(address))
            .attributes
            .merge(attributes);
        new
    }

    /// Fold `attributes` into the record of an already known node.
    pub fn merge(
        &mut self,
        address: &PeerAddress,
        attributes: &NodeAttributes,
    ) -> Result<(), RegistryError> {
        let record = self
            .nodes
            .get_mut(address)
            .ok_or(RegistryError::UnknownAddress(*address))?;
        record.attributes.merge(attributes);
        Ok(())
    }

    /// Attach a resolved location to an already known node.
    pub fn set_location(
        &mut self,
        address: &PeerAddress,
        location: Location,
    ) -> Result<(), RegistryError> {
        let record = self
            .nodes
            .get_mut(address)
            .ok_or(RegistryError::UnknownAddress(*address))?;
        record.location = Some(location);
        Ok(())
    }

    /// Record the traversal outcome for a node.
    ///
    /// A node's outcome can be assigned exactly once, and can never be
    /// `NotVisited`.
    pub fn set_state(
        &mut self,
        address: &PeerAddress,
        state: TraversalState,
    ) -> Result<(), RegistryError> {
        let current = self
            .traversal
            .get_mut(address)
            .ok_or(RegistryError::UnknownAddress(*address))?;
        if current.is_terminal() || !state.is_terminal() {
            return Err(RegistryError::InvalidTransition {
                address: *address,
                from: *current,
                to: state,
            });
        }
        *current = state;
        Ok(())
    }

    /// Traversal state of a node, if known.
    pub fn state(&self, address: &PeerAddress) -> Option<TraversalState> {
        self.traversal.get(address).copied()
    }

    /// Pick one not yet visited node, uniformly at random.
    pub fn pick_unvisited(&self) -> Option<PeerAddress> {
        let unvisited: Vec<PeerAddress> = self
            .traversal
            .iter()
            .filter(|(_, state)| !state.is_terminal())
            .map(|(address, _)| *address)
            .collect();
        if unvisited.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..unvisited.len());
        Some(unvisited[index])
    }

    /// Record of a node, if known.
    pub fn get(&self, address: &PeerAddress) -> Option<&NodeRecord> {
        self.nodes.get(address)
    }

    /// Addresses of all known nodes, in address order.
    pub fn addresses(&self) -> Vec<PeerAddress> {
        self.nodes.keys().copied().collect()
    }

    /// Records of all known nodes, in address order.
    pub fn records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is known yet.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A single height report collected during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeightObservation {
    /// Reported best block height.
    pub height: u64,
    /// Identifier of the block at that height.
    pub block_id: String,
}

/// Append-only log of every height reported during a crawl.
///
/// Each responding node contributes one entry per report, so agreeing
/// nodes show up as repeated entries rather than being collapsed.
#[derive(Debug, Default)]
pub struct HeightLog {
    observations: Vec<HeightObservation>,
}

impl HeightLog {
    /// Create an empty log.
    pub fn new() -> Self {
        HeightLog {
            observations: Vec::new(),
        }
    }

    /// Append one height report.
    pub fn record(&mut self, height: u64, block_id: String) {
        self.observations.push(HeightObservation { height, block_id });
    }

    /// Number of reports collected.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Whether no report was collected.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// All reports, in collection order.
    pub fn iter(&self) -> impl Iterator<Item = &HeightObservation> {
        self.observations.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::Ipv4Addr;

    fn address(last_octet: u8) -> PeerAddress {
        PeerAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), 4001)
    }

    #[test]
    fn test_register_reports_new_addresses_once() {
        let mut registry = NodeRegistry::new();

        assert!(registry.register(address(1), &NodeAttributes::default()));
        assert!(!registry.register(address(1), &NodeAttributes::default()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.state(&address(1)), Some(TraversalState::NotVisited));
    }

    #[test]
    fn test_merge_overlays_without_deleting() {
        let mut registry = NodeRegistry::new();
        let first = NodeAttributes {
            height: Some(100),
            version: Some("1.8.0".to_string()),
            ..Default::default()
        };
        registry.register(address(1), &first);

        // A later report with fewer fields must not erase the version.
        let second = NodeAttributes {
            height: Some(101),
            block_id: Some("abc".to_string()),
            ..Default::default()
        };
        registry.merge(&address(1), &second).unwrap();

        let attributes = &registry.get(&address(1)).unwrap().attributes;
        assert_eq!(attributes.height, Some(101));
        assert_eq!(attributes.block_id, Some("abc".to_string()));
        assert_eq!(attributes.version, Some("1.8.0".to_string()));
    }

    #[test]
    fn test_merge_overlays_extra_fields() {
        let mut attributes = NodeAttributes {
            extra: [("role".to_string(), json!("validator"))]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        attributes.merge(&NodeAttributes {
            extra: [("region".to_string(), json!("eu"))].into_iter().collect(),
            ..Default::default()
        });

        assert_eq!(attributes.extra.get("role"), Some(&json!("validator")));
        assert_eq!(attributes.extra.get("region"), Some(&json!("eu")));
    }

    #[test]
    fn test_merge_unknown_address() {
        let mut registry = NodeRegistry::new();
        assert_eq!(
            registry.merge(&address(9), &NodeAttributes::default()),
            Err(RegistryError::UnknownAddress(address(9)))
        );
    }

    #[test]
    fn test_set_state_is_assign_once() {
        let mut registry = NodeRegistry::new();
        registry.register(address(1), &NodeAttributes::default());

        registry
            .set_state(&address(1), TraversalState::PeersFetchSucceeded)
            .unwrap();
        let err = registry
            .set_state(&address(1), TraversalState::PeersFetchFailed)
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::InvalidTransition {
                address: address(1),
                from: TraversalState::PeersFetchSucceeded,
                to: TraversalState::PeersFetchFailed,
            }
        );
    }

    #[test]
    fn test_set_state_rejects_reset() {
        let mut registry = NodeRegistry::new();
        registry.register(address(1), &NodeAttributes::default());

        let err = registry
            .set_state(&address(1), TraversalState::NotVisited)
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
    }

    #[test]
    fn test_pick_unvisited_skips_terminal_nodes() {
        let mut registry = NodeRegistry::new();
        registry.register(address(1), &NodeAttributes::default());
        registry.register(address(2), &NodeAttributes::default());
        registry
            .set_state(&address(1), TraversalState::ConnectUnavailable)
            .unwrap();

        // Only one node remains eligible, so the random pick is forced.
        assert_eq!(registry.pick_unvisited(), Some(address(2)));

        registry
            .set_state(&address(2), TraversalState::PeersFetchSucceeded)
            .unwrap();
        assert_eq!(registry.pick_unvisited(), None);
    }

    #[test]
    fn test_record_serializes_with_flattened_attributes() {
        let mut registry = NodeRegistry::new();
        let attributes = NodeAttributes {
            height: Some(812_345),
            block_id: Some("000a".to_string()),
            version: Some("1.9.2".to_string()),
            ..Default::default()
        };
        registry.register(address(1), &attributes);

        let record = registry.get(&address(1)).unwrap();
        assert_eq!(
            serde_json::to_value(record).unwrap(),
            json!({
                "address": "10.0.0.1",
                "port": 4001,
                "height": 812_345,
                "blockId": "000a",
                "version": "1.9.2",
            })
        );
    }

    #[test]
    fn test_height_log_keeps_repeated_reports() {
        let mut log = HeightLog::new();
        log.record(100, "abc".to_string());
        log.record(100, "abc".to_string());
        log.record(99, "def".to_string());

        assert_eq!(log.len(), 3);
        let heights: Vec<u64> = log.iter().map(|observation| observation.height).collect();
        assert_eq!(heights, vec![100, 100, 99]);
    }
}
