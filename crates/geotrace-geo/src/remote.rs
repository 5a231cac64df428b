//! Remote geolocation tier (ipinfo-compatible HTTP API).

use crate::GeoError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::trace;

/// Body returned by the remote API. Missing fields are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteLocation {
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    /// "lat,lon".
    #[serde(default)]
    pub loc: String,
}

/// A remote lookup service. One call is one request; callers do not retry.
#[async_trait]
pub trait RemoteGeoApi: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<RemoteLocation, GeoError>;
}

/// Client for `GET <base>/<ip>?token=<token>`.
pub struct IpInfoClient {
    client: Client,
    base_url: String,
    token: String,
}

impl IpInfoClient {
    /// Creates a client whose requests give up after `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GeoError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GeoError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url_for(&self, ip: IpAddr) -> String {
        format!("{}/{}", self.base_url, ip)
    }
}

#[async_trait]
impl RemoteGeoApi for IpInfoClient {
    async fn lookup(&self, ip: IpAddr) -> Result<RemoteLocation, GeoError> {
        let mut request = self.client.get(self.url_for(ip));
        if !self.token.is_empty() {
            request = request.query(&[("token", self.token.as_str())]);
        }

        trace!(%ip, "Querying remote geolocation API");
        let response = request.send().await.map_err(GeoError::Request)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(GeoError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(GeoError::Request)?;
        serde_json::from_slice(&body).map_err(|e| GeoError::Malformed(e.to_string()))
    }
}
