//! Core types for trace enrichment.

use crate::ProbeError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// Sentinel used for every location field nothing could be learned about.
pub const UNKNOWN: &str = "N/A";

/// Default per-probe timeout in seconds.
pub const DEFAULT_MAX_RTT_SECS: u64 = 5;

/// Default maximum number of hops.
pub const DEFAULT_MAX_TTL: u8 = 30;

/// Parameters for one trace.
#[derive(Debug, Clone)]
pub struct TraceRequest {
    /// Target hostname or IP address.
    pub target: String,
    /// IPv4 source address; unspecified lets the kernel pick.
    pub source_v4: Ipv4Addr,
    /// IPv6 source address; unspecified lets the kernel pick.
    pub source_v6: Ipv6Addr,
    /// Timeout for each probe.
    pub probe_timeout: Duration,
    /// Maximum TTL to probe.
    pub max_ttl: u8,
}

impl TraceRequest {
    /// Creates a request with unspecified source addresses.
    pub fn new(target: impl Into<String>, probe_timeout: Duration, max_ttl: u8) -> Self {
        Self {
            target: target.into(),
            source_v4: Ipv4Addr::UNSPECIFIED,
            source_v6: Ipv6Addr::UNSPECIFIED,
            probe_timeout,
            max_ttl,
        }
    }

    /// Validates the parameters.
    pub fn validate(&self) -> Result<(), crate::TraceError> {
        if self.max_ttl == 0 {
            return Err(crate::TraceError::InvalidMaxTtl(self.max_ttl));
        }
        Ok(())
    }
}

/// Reply data for a probe that got an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopReply {
    /// The address that replied.
    pub addr: IpAddr,
    /// Round-trip time for this probe.
    pub rtt: Duration,
    /// Reverse DNS name, empty when unknown.
    pub host: String,
}

/// One probe result as produced by the probing engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHop {
    /// The TTL that was used for this probe.
    pub ttl: u8,
    /// The reply, or why there was none.
    pub reply: Result<HopReply, ProbeError>,
}

impl RawHop {
    pub fn replied(ttl: u8, reply: HopReply) -> Self {
        Self {
            ttl,
            reply: Ok(reply),
        }
    }

    pub fn failed(ttl: u8, error: ProbeError) -> Self {
        Self {
            ttl,
            reply: Err(error),
        }
    }
}

/// A hop as delivered by the engine, together with the round it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopEvent {
    pub hop: RawHop,
    pub round: usize,
}

/// Decimal latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Parses the `"lat,lon"` form used by remote geolocation APIs.
    pub fn parse_pair(text: &str) -> Option<Self> {
        let (lat, lon) = text.split_once(',')?;
        let latitude: f64 = lat.trim().parse().ok()?;
        let longitude: f64 = lon.trim().parse().ok()?;
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }
        Some(Self {
            latitude,
            longitude,
        })
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// Which tier produced a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    Local,
    Remote,
    Unknown,
}

/// Location of one address, as far as any source could tell.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    pub city: String,
    pub country: String,
    pub coordinates: Option<Coordinates>,
    /// False when every source was exhausted without an answer.
    pub resolved: bool,
    pub source: LocationSource,
    /// Autonomous system label, e.g. "AS15169 Google LLC".
    pub asn: Option<String>,
}

impl ResolvedLocation {
    /// The location reported when every tier failed.
    pub fn unknown() -> Self {
        Self {
            city: UNKNOWN.to_string(),
            country: UNKNOWN.to_string(),
            coordinates: None,
            resolved: false,
            source: LocationSource::Unknown,
            asn: None,
        }
    }

    /// Whether city, country, and coordinates are all present.
    pub fn is_complete(&self) -> bool {
        !self.city.is_empty() && !self.country.is_empty() && self.coordinates.is_some()
    }

    /// "Country/City", or the country alone when the city is not known.
    pub fn display_label(&self) -> String {
        if self.city.is_empty() || self.city == UNKNOWN {
            self.country.clone()
        } else {
            format!("{}/{}", self.country, self.city)
        }
    }

    /// "lat, lon" or the unknown sentinel.
    pub fn coordinates_text(&self) -> String {
        match self.coordinates {
            Some(coordinates) => coordinates.to_string(),
            None => UNKNOWN.to_string(),
        }
    }
}

/// The enriched record streamed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopRecord {
    /// 1-based ordinal over emitted hops.
    pub number: usize,
    pub ip: String,
    pub host: String,
    /// Milliseconds with three decimals.
    pub rtt: String,
    pub location: String,
    pub coordinates: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<String>,
}

/// Totals reported when a trace completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    /// Hop frames emitted.
    pub hops: usize,
    /// Probes dropped because they failed or timed out.
    pub dropped: usize,
}
