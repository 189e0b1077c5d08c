//! Simultaneous consensus snapshot across all reachable nodes.

use crate::pool::{ChannelPool, PeerChannel};
use crate::protocol::{StatusResponse, GET_STATUS};
use crate::registry::{HeightLog, NodeRegistry, RegistryError};
use futures::future::join_all;
use log::{debug, warn};
use peermap_connection::RequestEnvelope;

/// Ask every reachable node for its consensus status in one round.
///
/// All requests go out together and are awaited as a single barrier, so
/// the collected heights approximate one moment in network time. Each
/// answer appends to the height log and folds into the node's record.
/// Nodes that cannot be reached or answer unusably are skipped and keep
/// whatever discovery learned about them.
pub(crate) async fn scan<P: ChannelPool>(
    pool: &mut P,
    registry: &mut NodeRegistry,
    heights: &mut HeightLog,
) -> Result<(), RegistryError> {
    let request = RequestEnvelope::json();

    let mut reachable = Vec::new();
    for address in registry.addresses() {
        match pool.acquire(&address).await {
            Some(channel) => reachable.push((address, channel)),
            None => debug!("Skipping status scan of unreachable node {address}"),
        }
    }

    let probes = reachable.into_iter().map(|(address, channel)| {
        let request = &request;
        async move { (address, channel.call(GET_STATUS, request).await) }
    });

    for (address, result) in join_all(probes).await {
        let payload = match result {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Status request to {address} failed: {err}");
                continue;
            }
        };
        let status: StatusResponse = match serde_json::from_value(payload) {
            Ok(status) => status,
            Err(err) => {
                warn!("Node {address} returned an unusable status: {err}");
                continue;
            }
        };

        let header = &status.state.header;
        debug!("Node {address} reports height {} ({})", header.height, header.id);
        heights.record(header.height, header.id.clone());

        registry.merge(&address, &status.into_attributes())?;
    }

    Ok(())
}
