//! Geographic enrichment of crawled nodes.
//!
//! Looks up every known address against an ipinfo style HTTP service.
//! The service is shared, rate limited infrastructure, so lookups run
//! strictly one at a time with a courtesy pause between requests and a
//! long cooldown whenever the service pushes back.

use crate::crawler::CrawlConfig;
use crate::registry::{NodeRegistry, RegistryError};
use log::{debug, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::sleep;

/// Budget for a single location request.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Geographic facts about one address.
///
/// Fields mirror the location service's response; the service's echo
/// fields (`ip`, `anycast`, `readme`) are dropped on the way in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Reverse DNS name of the address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Latitude and longitude, comma separated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc: Option<String>,
    /// Owning organization, usually the hosting provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Errors from the location service.
#[derive(Debug, Clone)]
pub enum LookupError {
    /// The configured service endpoint is not a valid URL.
    InvalidUrl(String),
    /// The service asked us to slow down.
    RateLimited,
    /// The service answered with a non-success status.
    Status(u16),
    /// The request never completed or returned an unusable body.
    Transport(String),
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::InvalidUrl(url) => {
                write!(f, "Invalid location service URL: {url}")
            }
            LookupError::RateLimited => write!(f, "Location service rate limit hit"),
            LookupError::Status(code) => {
                write!(f, "Location service returned status {code}")
            }
            LookupError::Transport(err) => write!(f, "Location request failed: {err}"),
        }
    }
}

impl std::error::Error for LookupError {}

/// A service resolving addresses to geographic information.
pub(crate) trait LocationLookup {
    fn lookup(
        &self,
        ip: IpAddr,
    ) -> impl std::future::Future<Output = Result<Location, LookupError>> + Send;
}

/// HTTP client for an ipinfo style location service.
#[derive(Debug, Clone)]
pub(crate) struct LocationClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl LocationClient {
    /// Create a client for the service at `base_url`, authenticating
    /// with `token` when one is given.
    ///
    /// The URL is validated here so a typo fails the configuration
    /// instead of every lookup of the crawl.
    pub(crate) fn new(base_url: &str, token: Option<String>) -> Result<Self, LookupError> {
        let base_url = base_url.trim_end_matches('/');
        reqwest::Url::parse(base_url)
            .map_err(|_| LookupError::InvalidUrl(base_url.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .map_err(|err| LookupError::Transport(err.to_string()))?;
        Ok(LocationClient {
            http,
            base_url: base_url.to_string(),
            token,
        })
    }
}

impl LocationLookup for LocationClient {
    async fn lookup(&self, ip: IpAddr) -> Result<Location, LookupError> {
        let mut request = self.http.get(format!("{}/{ip}", self.base_url));
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|err| LookupError::Transport(err.to_string()))?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(LookupError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(LookupError::Status(response.status().as_u16()));
        }

        response
            .json()
            .await
            .map_err(|err| LookupError::Transport(err.to_string()))
    }
}

/// Resolve a location for every known node, strictly one at a time.
///
/// A successful lookup is followed by the configured courtesy delay. A
/// rate limit answer triggers the long cooldown and leaves that node
/// unlocated. Any other failure moves on immediately.
pub(crate) async fn enrich<L: LocationLookup>(
    config: &CrawlConfig,
    lookup: &L,
    registry: &mut NodeRegistry,
) -> Result<(), RegistryError> {
    for address in registry.addresses() {
        match lookup.lookup(address.ip).await {
            Ok(location) => {
                debug!("Located node {address}");
                registry.set_location(&address, location)?;
                sleep(config.lookup_delay).await;
            }
            Err(LookupError::RateLimited) => {
                warn!("Location service rate limited, backing off");
                sleep(config.lookup_cooldown).await;
            }
            Err(err) => {
                warn!("Could not locate {address}: {err}");
            }
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_utils::MockLookup;
    use super::*;
    use crate::registry::NodeAttributes;
    use peermap_connection::PeerAddress;
    use serde_json::json;
    use std::net::Ipv4Addr;

    fn ip(last_octet: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet))
    }

    fn address(last_octet: u8) -> PeerAddress {
        PeerAddress::new(ip(last_octet), 4001)
    }

    fn located(city: &str) -> Location {
        Location {
            city: Some(city.to_string()),
            country: Some("DE".to_string()),
            ..Default::default()
        }
    }

    fn config() -> CrawlConfig {
        CrawlConfig {
            network_port: 4001,
            disconnect: true,
            lookup_delay: Duration::from_millis(500),
            lookup_cooldown: Duration::from_secs(60),
        }
    }

    fn registry_of(last_octets: &[u8]) -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        for octet in last_octets {
            registry.register(address(*octet), &NodeAttributes::default());
        }
        registry
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrich_stores_resolved_locations() {
        let lookup = MockLookup::new();
        lookup.script(ip(1), Ok(located("Berlin")));
        let mut registry = registry_of(&[1]);

        enrich(&config(), &lookup, &mut registry).await.unwrap();

        assert_eq!(
            registry.get(&address(1)).unwrap().location,
            Some(located("Berlin"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrich_spaces_successful_lookups() {
        let lookup = MockLookup::new();
        lookup.script(ip(1), Ok(located("Berlin")));
        lookup.script(ip(2), Ok(located("Helsinki")));
        let mut registry = registry_of(&[1, 2]);

        enrich(&config(), &lookup, &mut registry).await.unwrap();

        let calls = lookup.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1 - calls[0].1, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrich_backs_off_when_rate_limited() {
        let lookup = MockLookup::new();
        lookup.script(ip(1), Err(LookupError::RateLimited));
        lookup.script(ip(2), Ok(located("Helsinki")));
        let mut registry = registry_of(&[1, 2]);

        enrich(&config(), &lookup, &mut registry).await.unwrap();

        let calls = lookup.calls();
        assert_eq!(calls[1].1 - calls[0].1, Duration::from_secs(60));
        // The rate limited node stays unlocated.
        assert_eq!(registry.get(&address(1)).unwrap().location, None);
        assert_eq!(
            registry.get(&address(2)).unwrap().location,
            Some(located("Helsinki"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrich_moves_on_immediately_after_failure() {
        let lookup = MockLookup::new();
        lookup.script(ip(1), Err(LookupError::Status(500)));
        lookup.script(ip(2), Ok(located("Helsinki")));
        let mut registry = registry_of(&[1, 2]);

        enrich(&config(), &lookup, &mut registry).await.unwrap();

        let calls = lookup.calls();
        assert_eq!(calls[1].1 - calls[0].1, Duration::ZERO);
    }

    #[test]
    fn test_location_drops_service_echo_fields() {
        let location: Location = serde_json::from_value(json!({
            "ip": "203.0.113.7",
            "city": "Berlin",
            "country": "DE",
            "org": "AS12345 Example Hosting",
            "anycast": false,
            "readme": "https://ipinfo.io/missingauth",
        }))
        .unwrap();

        assert_eq!(
            serde_json::to_value(&location).unwrap(),
            json!({
                "city": "Berlin",
                "country": "DE",
                "org": "AS12345 Example Hosting",
            })
        );
    }

    #[test]
    fn test_client_rejects_invalid_url() {
        let result = LocationClient::new("not a url", None);
        assert!(matches!(result, Err(LookupError::InvalidUrl(_))));
    }
}
