/*
[INPUT]:  Region endpoint candidates (built-in list or caller-supplied)
[OUTPUT]: Round-robin endpoint selection for connection attempts
[POS]:    WebSocket layer - endpoint pool
[UPDATE]: When the venue adds or retires region gateways
*/

use url::Url;

use crate::error::{PocketOptionError, Result};

/// Engine.IO query string shared by every gateway
const SOCKET_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

/// Region gateways observed on the live venue
const LIVE_REGIONS: &[(&str, &str)] = &[
    ("EUROPA", "wss://api-eu.po.market"),
    ("SEA", "wss://api-sc.po.market"),
    ("ASIA", "wss://api-asia.po.market"),
    ("FINANCE", "wss://api-fin.po.market"),
    ("US", "wss://api-us-north.po.market"),
];

/// Demo-account gateway
const DEMO_REGIONS: &[(&str, &str)] = &[("DEMO", "wss://demo-api-eu.po.market")];

/// One candidate gateway: URL plus region label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    region: String,
}

impl Endpoint {
    /// Build an endpoint from a full WebSocket URL
    pub fn new(url: &str, region: impl Into<String>) -> Result<Self> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self {
                url,
                region: region.into(),
            }),
            other => Err(PocketOptionError::Config(format!(
                "endpoint scheme must be ws or wss, got `{other}`"
            ))),
        }
    }

    fn from_host(host: &str, region: &str) -> Self {
        let url = Url::parse(&format!("{host}{SOCKET_PATH}"))
            .expect("built-in endpoint URL is well-formed");
        Self {
            url,
            region: region.to_string(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Whether the endpoint uses TLS
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.url, self.region)
    }
}

/// Ordered candidate list with a round-robin cursor.
///
/// Every attempt takes the next endpoint; the cursor wraps so all candidates
/// are tried before any is revisited.
#[derive(Debug, Clone)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
    cursor: usize,
}

impl EndpointPool {
    /// Pool over a caller-supplied candidate list
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(PocketOptionError::Config(
                "endpoint pool cannot be empty".into(),
            ));
        }
        Ok(Self {
            endpoints,
            cursor: 0,
        })
    }

    /// Built-in live-account gateways
    pub fn live() -> Self {
        Self {
            endpoints: LIVE_REGIONS
                .iter()
                .map(|(region, host)| Endpoint::from_host(host, region))
                .collect(),
            cursor: 0,
        }
    }

    /// Built-in demo-account gateway
    pub fn demo() -> Self {
        Self {
            endpoints: DEMO_REGIONS
                .iter()
                .map(|(region, host)| Endpoint::from_host(host, region))
                .collect(),
            cursor: 0,
        }
    }

    /// Next candidate, round-robin
    pub fn next_endpoint(&mut self) -> &Endpoint {
        let endpoint = &self.endpoints[self.cursor];
        self.cursor = (self.cursor + 1) % self.endpoints.len();
        endpoint
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
