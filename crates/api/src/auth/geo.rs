//! Best-effort coarse geo-location of client addresses.
//!
//! Lookups never fail the caller: local addresses short-circuit to
//! [`LOCAL_NETWORK`], and any error or timeout degrades to
//! [`UNKNOWN_LOCATION`].

use std::time::Duration;

use async_trait::async_trait;
use gatekeeper_core::network::{is_local_address, LOCAL_NETWORK, UNKNOWN_LOCATION};
use serde::Deserialize;

#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self, ip: &str) -> String;
}

/// Locator used when no lookup endpoint is configured.
pub struct DisabledGeoLocator;

#[async_trait]
impl GeoLocator for DisabledGeoLocator {
    async fn locate(&self, ip: &str) -> String {
        if is_local_address(ip) {
            LOCAL_NETWORK.to_string()
        } else {
            UNKNOWN_LOCATION.to_string()
        }
    }
}

/// Expected lookup response; extra fields are ignored.
#[derive(Debug, Deserialize)]
struct GeoResponse {
    city: Option<String>,
    country: Option<String>,
}

impl GeoResponse {
    fn label(self) -> Option<String> {
        let parts: Vec<String> = [self.city, self.country]
            .into_iter()
            .flatten()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Locator calling an HTTP endpoint. `{ip}` in the URL template is
/// replaced with the address.
pub struct HttpGeoLocator {
    client: reqwest::Client,
    url_template: String,
    timeout: Duration,
}

impl HttpGeoLocator {
    pub fn new(url_template: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url_template,
            timeout,
        })
    }

    async fn lookup(&self, ip: &str) -> Result<Option<String>, reqwest::Error> {
        let url = self.url_template.replace("{ip}", ip);
        let body: GeoResponse = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.label())
    }
}

#[async_trait]
impl GeoLocator for HttpGeoLocator {
    async fn locate(&self, ip: &str) -> String {
        if is_local_address(ip) {
            return LOCAL_NETWORK.to_string();
        }
        if ip.parse::<std::net::IpAddr>().is_err() {
            return UNKNOWN_LOCATION.to_string();
        }

        match tokio::time::timeout(self.timeout, self.lookup(ip)).await {
            Ok(Ok(Some(location))) => location,
            Ok(Ok(None)) => UNKNOWN_LOCATION.to_string(),
            Ok(Err(e)) => {
                tracing::debug!(ip, error = %e, "Geo lookup failed");
                UNKNOWN_LOCATION.to_string()
            }
            Err(_) => {
                tracing::debug!(ip, "Geo lookup timed out");
                UNKNOWN_LOCATION.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_addresses_never_leave_the_process() {
        let locator = DisabledGeoLocator;
        assert_eq!(locator.locate("192.168.0.10").await, LOCAL_NETWORK);
        assert_eq!(locator.locate("::1").await, LOCAL_NETWORK);
        assert_eq!(locator.locate("8.8.8.8").await, UNKNOWN_LOCATION);
    }

    #[tokio::test]
    async fn unreachable_endpoint_degrades_to_unknown() {
        // Port 9 on loopback: nothing listens, the connect fails fast.
        let locator = HttpGeoLocator::new(
            "http://127.0.0.1:9/{ip}".to_string(),
            Duration::from_millis(500),
        )
        .unwrap();
        assert_eq!(locator.locate("8.8.8.8").await, UNKNOWN_LOCATION);
        assert_eq!(locator.locate("10.0.0.1").await, LOCAL_NETWORK);
        assert_eq!(locator.locate("not-an-ip").await, UNKNOWN_LOCATION);
    }

    #[test]
    fn label_joins_present_parts() {
        let full = GeoResponse {
            city: Some("Lisbon".into()),
            country: Some("Portugal".into()),
        };
        assert_eq!(full.label().as_deref(), Some("Lisbon, Portugal"));

        let empty = GeoResponse {
            city: Some(" ".into()),
            country: None,
        };
        assert_eq!(empty.label(), None);
    }
}
