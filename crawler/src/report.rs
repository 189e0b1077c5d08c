//! Aggregated summary of a finished crawl.

use crate::crawler::Crawl;
use crate::registry::{HeightLog, NodeRegistry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Version bucket for scanned nodes that reported no version.
const UNKNOWN_VERSION: &str = "unknown";

/// Node counts at one reported height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeightSummary {
    /// The reported height.
    pub height: u64,
    /// How many nodes reported it.
    pub count: usize,
    /// Nodes per block identifier at this height. More than one entry
    /// means the network disagrees about the block at this height.
    pub block_ids: BTreeMap<String, usize>,
}

/// Node count for one software version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionSummary {
    /// The reported version, or `"unknown"`.
    pub version: String,
    /// How many scanned nodes run it.
    pub count: usize,
}

/// Response time statistics across all nodes that reported latency.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub average_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
}

/// Network wide summary derived from a finished crawl.
///
/// Renders as the human readable text layout via [`fmt::Display`] and as
/// JSON via [`Serialize`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkReport {
    /// All nodes learned about, reachable or not.
    pub total_nodes: usize,
    /// Nodes that answered the status scan.
    pub online: usize,
    /// Nodes that did not.
    pub offline: usize,
    /// Per height node counts, highest first.
    pub heights: Vec<HeightSummary>,
    /// Per version node counts over scanned nodes, descending by version.
    pub versions: Vec<VersionSummary>,
    /// Response time statistics, absent when no node reported latency.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencySummary>,
    /// Wall clock duration of the crawl in milliseconds.
    pub elapsed_ms: u64,
}

impl NetworkReport {
    /// Summarize a finished crawl.
    pub fn new(registry: &NodeRegistry, heights: &HeightLog, elapsed: Duration) -> Self {
        let mut by_height: BTreeMap<u64, BTreeMap<String, usize>> = BTreeMap::new();
        for observation in heights.iter() {
            *by_height
                .entry(observation.height)
                .or_default()
                .entry(observation.block_id.clone())
                .or_default() += 1;
        }
        let height_summaries = by_height
            .into_iter()
            .rev()
            .map(|(height, block_ids)| HeightSummary {
                height,
                count: block_ids.values().sum(),
                block_ids,
            })
            .collect();

        // A node counts as scanned when the scan stamped a tip onto its
        // record; gossip alone leaves one of the fields unset.
        let mut by_version: BTreeMap<String, usize> = BTreeMap::new();
        for record in registry.records() {
            if record.attributes.height.is_none() || record.attributes.block_id.is_none() {
                continue;
            }
            let version = record
                .attributes
                .version
                .clone()
                .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
            *by_version.entry(version).or_default() += 1;
        }
        let version_summaries = by_version
            .into_iter()
            .rev()
            .map(|(version, count)| VersionSummary { version, count })
            .collect();

        let delays: Vec<u64> = registry
            .records()
            .filter_map(|record| record.attributes.latency)
            .collect();
        let latency = match (delays.iter().min(), delays.iter().max()) {
            (Some(min), Some(max)) => Some(LatencySummary {
                average_ms: delays.iter().sum::<u64>() as f64 / delays.len() as f64,
                min_ms: *min,
                max_ms: *max,
            }),
            _ => None,
        };

        let online = heights.len();
        NetworkReport {
            total_nodes: registry.len(),
            online,
            offline: registry.len().saturating_sub(online),
            heights: height_summaries,
            versions: version_summaries,
            latency,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Summarize a crawl result.
    pub fn from_crawl(crawl: &Crawl) -> Self {
        NetworkReport::new(&crawl.registry, &crawl.heights, crawl.elapsed)
    }
}

impl fmt::Display for NetworkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===========================================")?;
        writeln!(f, "All nodes: {}", self.total_nodes)?;
        writeln!(f, "Nodes online: {}", self.online)?;
        writeln!(f, "Nodes offline: {}", self.offline)?;

        writeln!(f)?;
        writeln!(f, "Height and block stats:")?;
        for stat in &self.heights {
            writeln!(f, "  {} with {} nodes. Block hashes:", stat.height, stat.count)?;
            for (block_id, nodes) in &stat.block_ids {
                writeln!(f, "    - {block_id} ({nodes} nodes)")?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Version stats:")?;
        for stat in &self.versions {
            writeln!(f, "  - {} on {} nodes", stat.version, stat.count)?;
        }

        if let Some(latency) = &self.latency {
            writeln!(f)?;
            writeln!(f, "Delay")?;
            writeln!(f, "  Avg: {:.2}ms", latency.average_ms)?;
            writeln!(f, "  Min: {}ms", latency.min_ms)?;
            writeln!(f, "  Max: {}ms", latency.max_ms)?;
        }

        writeln!(f, "------------------------------------------")?;
        write!(f, "Finished scanning in {}ms", self.elapsed_ms)
    }
}
