mod builder;
mod crawler;
mod discovery;
mod enrich;
mod pool;
mod protocol;
mod registry;
mod report;
mod scan;

pub use builder::{CrawlerBuilder, CrawlerBuilderError};
pub use crawler::{Crawl, CrawlConfig, Crawler};
pub use enrich::{Location, LookupError};
pub use protocol::{
    HeaderSummary, NodeState, PeerDescriptor, StatusResponse, GET_PEERS, GET_STATUS,
};
pub use registry::{
    HeightLog, HeightObservation, NodeAttributes, NodeRecord, NodeRegistry, RegistryError,
    TraversalState,
};
pub use report::{HeightSummary, LatencySummary, NetworkReport, VersionSummary};

// Re-exports.
pub use peermap_connection::{ChannelError, PeerAddress};
