//! Frontier walk asking every known node for its peers.

use crate::crawler::CrawlConfig;
use crate::pool::{ChannelPool, PeerChannel};
use crate::protocol::{PeerDescriptor, GET_PEERS};
use crate::registry::{NodeRegistry, RegistryError, TraversalState};
use log::{debug, warn};
use peermap_connection::RequestEnvelope;

/// Walk the network until every known node has been asked for its peers.
///
/// One node is drawn from the not yet visited frontier at a time, picked
/// uniformly at random so repeated crawls do not favor any part of the
/// network. Newly reported peers join the frontier; each node is asked
/// exactly once. Unreachable nodes and failed requests are recorded as
/// such and skipped.
pub(crate) async fn discover<P: ChannelPool>(
    config: &CrawlConfig,
    pool: &mut P,
    registry: &mut NodeRegistry,
) -> Result<(), RegistryError> {
    let request = RequestEnvelope::json();

    while let Some(address) = registry.pick_unvisited() {
        let Some(channel) = pool.acquire(&address).await else {
            debug!("Node {address} is unreachable");
            registry.set_state(&address, TraversalState::ConnectUnavailable)?;
            continue;
        };

        let payload = match channel.call(GET_PEERS, &request).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Peer list request to {address} failed: {err}");
                registry.set_state(&address, TraversalState::PeersFetchFailed)?;
                continue;
            }
        };
        let peers: Vec<PeerDescriptor> = match serde_json::from_value(payload) {
            Ok(peers) => peers,
            Err(err) => {
                warn!("Node {address} returned an unusable peer list: {err}");
                registry.set_state(&address, TraversalState::PeersFetchFailed)?;
                continue;
            }
        };

        debug!("Node {address} shared {} peers", peers.len());
        registry.set_state(&address, TraversalState::PeersFetchSucceeded)?;

        for peer in peers {
            if let Some(port) = peer.port {
                if port != config.network_port {
                    warn!(
                        "Peer {} advertises non-standard port {port}",
                        peer.address
                    );
                }
            }
            let endpoint = peer.endpoint(config.network_port);
            registry.register(endpoint, &peer.attributes);
            pool.open_if_absent(endpoint);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::test_utils::{MockChannel, MockPool};
    use crate::registry::NodeAttributes;
    use peermap_connection::{ChannelError, PeerAddress};
    use serde_json::{json, Value};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn address(last_octet: u8) -> PeerAddress {
        PeerAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), 4001)
    }

    fn peer_list(last_octets: &[u8]) -> Value {
        Value::Array(
            last_octets
                .iter()
                .map(|octet| json!({"address": format!("10.0.0.{octet}")}))
                .collect(),
        )
    }

    fn config() -> CrawlConfig {
        CrawlConfig {
            network_port: 4001,
            disconnect: true,
            lookup_delay: Duration::from_millis(500),
            lookup_cooldown: Duration::from_secs(60),
        }
    }

    fn seeded_registry(pool: &mut MockPool) -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(address(1), &NodeAttributes::default());
        pool.open_if_absent(address(1));
        registry
    }

    #[tokio::test]
    async fn test_discover_reaches_everything_the_seed_can_see() {
        let mut pool = MockPool::new();
        for (octet, known) in [(1, vec![2, 3]), (2, vec![4]), (3, vec![]), (4, vec![])] {
            let channel = MockChannel::new();
            channel.script(GET_PEERS, Ok(peer_list(&known)));
            pool.add_channel(address(octet), channel);
        }
        let mut registry = seeded_registry(&mut pool);

        discover(&config(), &mut pool, &mut registry).await.unwrap();

        assert_eq!(registry.len(), 4);
        for octet in [1, 2, 3, 4] {
            assert_eq!(
                registry.state(&address(octet)),
                Some(TraversalState::PeersFetchSucceeded)
            );
        }
    }

    #[tokio::test]
    async fn test_discover_asks_each_node_at_most_once() {
        // Every node reports every other node, so each address is reported
        // multiple times but may only be asked once.
        let mut pool = MockPool::new();
        let mut channels = Vec::new();
        for (octet, known) in [(1, vec![2, 3]), (2, vec![1, 3]), (3, vec![1, 2])] {
            let channel = MockChannel::new();
            channel.script(GET_PEERS, Ok(peer_list(&known)));
            pool.add_channel(address(octet), channel.clone());
            channels.push(channel);
        }
        let mut registry = seeded_registry(&mut pool);

        discover(&config(), &mut pool, &mut registry).await.unwrap();

        for channel in channels {
            assert_eq!(channel.call_count(GET_PEERS), 1);
        }
    }

    #[tokio::test]
    async fn test_discover_skips_unreachable_nodes() {
        // Node 3 is unreachable and was the only one that knew node 4.
        let mut pool = MockPool::new();
        for (octet, known) in [(1, vec![2, 3]), (2, vec![])] {
            let channel = MockChannel::new();
            channel.script(GET_PEERS, Ok(peer_list(&known)));
            pool.add_channel(address(octet), channel);
        }
        let mut registry = seeded_registry(&mut pool);

        discover(&config(), &mut pool, &mut registry).await.unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.state(&address(3)),
            Some(TraversalState::ConnectUnavailable)
        );
        assert!(registry.get(&address(4)).is_none());
    }

    #[tokio::test]
    async fn test_discover_tolerates_failed_peer_requests() {
        let mut pool = MockPool::new();
        let seed_channel = MockChannel::new();
        seed_channel.script(GET_PEERS, Ok(peer_list(&[2])));
        pool.add_channel(address(1), seed_channel);
        let failing = MockChannel::new();
        failing.script(GET_PEERS, Err(ChannelError::TimedOut));
        pool.add_channel(address(2), failing);
        let mut registry = seeded_registry(&mut pool);

        discover(&config(), &mut pool, &mut registry).await.unwrap();

        assert_eq!(
            registry.state(&address(1)),
            Some(TraversalState::PeersFetchSucceeded)
        );
        assert_eq!(
            registry.state(&address(2)),
            Some(TraversalState::PeersFetchFailed)
        );
    }

    #[tokio::test]
    async fn test_discover_rejects_unusable_peer_lists() {
        let mut pool = MockPool::new();
        let channel = MockChannel::new();
        channel.script(GET_PEERS, Ok(json!({"peers": "not a list"})));
        pool.add_channel(address(1), channel);
        let mut registry = seeded_registry(&mut pool);

        discover(&config(), &mut pool, &mut registry).await.unwrap();

        assert_eq!(
            registry.state(&address(1)),
            Some(TraversalState::PeersFetchFailed)
        );
    }

    #[tokio::test]
    async fn test_discover_defaults_missing_ports() {
        let mut pool = MockPool::new();
        let channel = MockChannel::new();
        channel.script(
            GET_PEERS,
            Ok(json!([
                {"address": "10.0.0.2", "port": 4002},
                {"address": "10.0.0.3"},
            ])),
        );
        pool.add_channel(address(1), channel);
        let mut registry = seeded_registry(&mut pool);

        discover(&config(), &mut pool, &mut registry).await.unwrap();

        let overridden = PeerAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 4002);
        assert!(registry.get(&overridden).is_some());
        assert!(registry.get(&address(3)).is_some());
        assert!(pool.opened().contains(&overridden));
        assert!(pool.opened().contains(&address(3)));
    }

    #[tokio::test]
    async fn test_discover_merges_reported_attributes() {
        let mut pool = MockPool::new();
        let channel = MockChannel::new();
        channel.script(
            GET_PEERS,
            Ok(json!([
                {"address": "10.0.0.2", "version": "1.9.1", "height": 812_000},
            ])),
        );
        pool.add_channel(address(1), channel);
        let mut registry = seeded_registry(&mut pool);

        discover(&config(), &mut pool, &mut registry).await.unwrap();

        let attributes = &registry.get(&address(2)).unwrap().attributes;
        assert_eq!(attributes.version, Some("1.9.1".to_string()));
        assert_eq!(attributes.height, Some(812_000));
    }
}
