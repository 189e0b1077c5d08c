//! Top level orchestration of a crawl.

use crate::discovery::discover;
use crate::enrich::{enrich, LocationClient, LocationLookup};
use crate::pool::ChannelPool;
use crate::protocol::PeerDescriptor;
use crate::registry::{HeightLog, NodeAttributes, NodeRegistry, RegistryError};
use crate::scan::scan;
use log::{error, info};
use peermap_connection::{ConnectionPool, PeerAddress};
use std::time::{Duration, Instant};

/// Settings governing a crawl.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Port assumed for peers that do not advertise one.
    pub network_port: u16,
    /// Whether to close every connection once scanning is done.
    pub disconnect: bool,
    /// Courtesy pause between successful location lookups.
    pub lookup_delay: Duration,
    /// Backoff applied when the location service rate limits.
    pub lookup_cooldown: Duration,
}

/// Result of one crawl over the network.
#[derive(Debug)]
pub struct Crawl {
    /// Everything learned about every node.
    pub registry: NodeRegistry,
    /// Every height reported during the scan.
    pub heights: HeightLog,
    /// Wall clock duration of the whole crawl.
    pub elapsed: Duration,
    /// Bookkeeping violation that cut the crawl short, if any.
    pub aborted: Option<RegistryError>,
}

/// A crawler for a peer to peer node network.
///
/// Starting from a seed, the crawler discovers the reachable node
/// population, snapshots every node's consensus state in one round, and
/// optionally resolves node locations. Individual nodes failing never
/// stops a crawl; everything learned accumulates in the returned
/// [`Crawl`].
#[derive(Debug)]
pub struct Crawler {
    config: CrawlConfig,
    pool: ConnectionPool,
    lookup: Option<LocationClient>,
}

impl Crawler {
    pub(crate) fn new(
        config: CrawlConfig,
        pool: ConnectionPool,
        lookup: Option<LocationClient>,
    ) -> Self {
        Crawler {
            config,
            pool,
            lookup,
        }
    }

    /// Crawl the network reachable from `seed`.
    ///
    /// # Arguments
    ///
    /// * `seed` - Address of the first node to ask for peers.
    ///
    /// # Returns
    ///
    /// The accumulated crawl results. If a bookkeeping invariant was
    /// violated the crawl ends early, [`Crawl::aborted`] names the
    /// violation, and everything learned up to that point is retained.
    pub async fn run(&mut self, seed: PeerAddress) -> Crawl {
        let mut registry = NodeRegistry::new();
        registry.register(seed, &NodeAttributes::default());
        self.pool.open_if_absent(seed);
        self.execute(registry).await
    }

    /// Crawl the network starting from a saved list of peers.
    ///
    /// Every descriptor is registered up front, then the crawl proceeds
    /// exactly as from a single seed. Descriptors without a port use the
    /// configured network port.
    pub async fn run_from_peers(&mut self, peers: Vec<PeerDescriptor>) -> Crawl {
        let mut registry = NodeRegistry::new();
        for peer in peers {
            let endpoint = peer.endpoint(self.config.network_port);
            registry.register(endpoint, &peer.attributes);
            self.pool.open_if_absent(endpoint);
        }
        self.execute(registry).await
    }

    async fn execute(&mut self, mut registry: NodeRegistry) -> Crawl {
        let started = Instant::now();
        let mut heights = HeightLog::new();

        let outcome = run_phases(
            &self.config,
            &mut self.pool,
            self.lookup.as_ref(),
            &mut registry,
            &mut heights,
        )
        .await;
        if let Err(err) = &outcome {
            error!("Crawl aborted: {err}");
        }

        Crawl {
            registry,
            heights,
            elapsed: started.elapsed(),
            aborted: outcome.err(),
        }
    }
}

/// The phases of a crawl, in order, over an already seeded registry.
async fn run_phases<P: ChannelPool, L: LocationLookup>(
    config: &CrawlConfig,
    pool: &mut P,
    lookup: Option<&L>,
    registry: &mut NodeRegistry,
    heights: &mut HeightLog,
) -> Result<(), RegistryError> {
    info!("Discovering network peers");
    discover(config, pool, registry).await?;

    info!("Scanning network");
    scan(pool, registry, heights).await?;

    if config.disconnect {
        info!("Disconnecting from all peers");
        pool.disconnect_all().await;
    }

    if let Some(lookup) = lookup {
        info!("Locating nodes");
        enrich(config, lookup, registry).await?;
    }

    Ok(())
}
