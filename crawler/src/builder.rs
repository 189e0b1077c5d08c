//! Builder style configuration and construction of crawlers.

use crate::crawler::{CrawlConfig, Crawler};
use crate::enrich::{LocationClient, LookupError};
use peermap_connection::{ConnectionPool, PoolConfig};
use std::fmt;
use std::time::Duration;

/// Default courtesy pause between location lookups.
const DEFAULT_LOOKUP_DELAY: Duration = Duration::from_millis(500);
/// Default backoff after the location service rate limits.
const DEFAULT_LOOKUP_COOLDOWN: Duration = Duration::from_secs(60);

/// Errors raised while configuring a crawler.
#[derive(Debug, Clone)]
pub enum CrawlerBuilderError {
    /// The location service client could not be created.
    Location(LookupError),
}

impl fmt::Display for CrawlerBuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerBuilderError::Location(err) => {
                write!(f, "Invalid location service: {err}")
            }
        }
    }
}

impl std::error::Error for CrawlerBuilderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrawlerBuilderError::Location(err) => Some(err),
        }
    }
}

/// Builder for a [`Crawler`] with customized settings.
///
/// # Example
///
/// ```
/// use peermap_crawler::CrawlerBuilder;
/// use std::time::Duration;
///
/// // Create a basic crawler for a network listening on port 4001.
/// let basic_crawler = CrawlerBuilder::new(4001).build();
///
/// // Create a crawler with custom settings.
/// let custom_crawler = CrawlerBuilder::new(4001)
///     .with_call_timeout(Duration::from_secs(5))
///     .with_disconnect(false)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct CrawlerBuilder {
    /// Port assumed for peers that do not advertise one.
    network_port: u16,
    /// Connection timeouts handed to the pool.
    pool_config: PoolConfig,
    /// Whether to close all connections once scanning is done.
    disconnect: bool,
    /// Courtesy pause between location lookups.
    lookup_delay: Duration,
    /// Backoff after the location service rate limits.
    lookup_cooldown: Duration,
    /// Location service client, when enrichment is wanted.
    lookup: Option<LocationClient>,
}

impl CrawlerBuilder {
    /// Create a new crawler builder for a network on the given port.
    ///
    /// # Arguments
    ///
    /// * `network_port` - Port assumed for peers that do not advertise one.
    ///
    /// # Returns
    ///
    /// A builder primed with the default settings.
    pub fn new(network_port: u16) -> Self {
        CrawlerBuilder {
            network_port,
            pool_config: PoolConfig::new(),
            disconnect: true,
            lookup_delay: DEFAULT_LOOKUP_DELAY,
            lookup_cooldown: DEFAULT_LOOKUP_COOLDOWN,
            lookup: None,
        }
    }

    /// Set the timeout for establishing a connection to a node.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait for a dial (defaults to 10 seconds).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config = self.pool_config.with_connect_timeout(timeout);
        self
    }

    /// Set the timeout for a single request to a node.
    ///
    /// A shorter timeout speeds up crawling when nodes are unresponsive,
    /// while a longer one may help on slow networks.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait for an answer (defaults to 2500 milliseconds).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config = self.pool_config.with_call_timeout(timeout);
        self
    }

    /// Control whether the crawler closes all connections after scanning.
    ///
    /// # Arguments
    ///
    /// * `disconnect` - `false` keeps connections open (defaults to `true`).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_disconnect(mut self, disconnect: bool) -> Self {
        self.disconnect = disconnect;
        self
    }

    /// Set the courtesy pause between successful location lookups.
    ///
    /// # Arguments
    ///
    /// * `delay` - Pause after each lookup (defaults to 500 milliseconds).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    /// Set the backoff applied when the location service rate limits.
    ///
    /// # Arguments
    ///
    /// * `cooldown` - Wait before the next lookup (defaults to 60 seconds).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_lookup_cooldown(mut self, cooldown: Duration) -> Self {
        self.lookup_cooldown = cooldown;
        self
    }

    /// Enable location enrichment against an ipinfo style service.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Service endpoint, for example `https://ipinfo.io`.
    /// * `token` - API token, when the service requires one.
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining.
    /// * `Err(CrawlerBuilderError)` - If the service client could not be created.
    pub fn with_location_lookup(
        mut self,
        base_url: &str,
        token: Option<String>,
    ) -> Result<Self, CrawlerBuilderError> {
        let client =
            LocationClient::new(base_url, token).map_err(CrawlerBuilderError::Location)?;
        self.lookup = Some(client);
        Ok(self)
    }

    /// Build the crawler from the configured options.
    ///
    /// # Returns
    ///
    /// The configured `Crawler`.
    pub fn build(self) -> Crawler {
        let config = CrawlConfig {
            network_port: self.network_port,
            disconnect: self.disconnect,
            lookup_delay: self.lookup_delay,
            lookup_cooldown: self.lookup_cooldown,
        };
        Crawler::new(config, ConnectionPool::new(self.pool_config), self.lookup)
    }
}
