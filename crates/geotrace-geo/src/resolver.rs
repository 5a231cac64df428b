//! Tiered resolution: local database first, remote API when incomplete.

use crate::{LocalGeoDb, RemoteGeoApi, RemoteLocation};
use geotrace_core::{Coordinates, LocationSource, ResolvedLocation};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Process-wide resolver holding the shared data sources.
pub struct GeoResolver {
    local: Arc<dyn LocalGeoDb>,
    remote: Arc<dyn RemoteGeoApi>,
}

impl GeoResolver {
    pub fn new(local: Arc<dyn LocalGeoDb>, remote: Arc<dyn RemoteGeoApi>) -> Self {
        Self { local, remote }
    }

    /// Starts a lookup session with an empty cache. Use one per trace.
    pub fn session(&self) -> GeoSession<'_> {
        GeoSession {
            resolver: self,
            cache: HashMap::new(),
        }
    }

    async fn lookup(&self, ip: IpAddr) -> ResolvedLocation {
        let asn = self.local.lookup_asn(ip).map(|record| record.label());

        if let Some(record) = self.local.lookup_city(ip) {
            let location = record.into_location();
            if location.is_complete() {
                trace!(%ip, "Resolved from local database");
                return ResolvedLocation { asn, ..location };
            }
            debug!(
                %ip,
                city = %location.city,
                country = %location.country,
                has_coordinates = location.coordinates.is_some(),
                "Local record incomplete, falling back to remote API"
            );
        } else {
            debug!(%ip, "No local record, falling back to remote API");
        }

        let location = match self.remote.lookup(ip).await {
            Ok(remote) => from_remote(ip, remote),
            Err(e) => {
                warn!(%ip, error = %e, "Remote geolocation failed");
                ResolvedLocation::unknown()
            }
        };
        ResolvedLocation { asn, ..location }
    }
}

fn from_remote(ip: IpAddr, remote: RemoteLocation) -> ResolvedLocation {
    let coordinates = Coordinates::parse_pair(&remote.loc);
    if coordinates.is_none() && !remote.loc.is_empty() {
        debug!(%ip, loc = %remote.loc, "Ignoring unparseable coordinates");
    }

    ResolvedLocation {
        city: remote.city,
        country: remote.country,
        coordinates,
        resolved: true,
        source: LocationSource::Remote,
        asn: None,
    }
}

/// Lookups for one trace. Every answer, including unknown ones, is cached
/// until the session is dropped.
pub struct GeoSession<'a> {
    resolver: &'a GeoResolver,
    cache: HashMap<IpAddr, ResolvedLocation>,
}

impl GeoSession<'_> {
    pub async fn resolve(&mut self, ip: IpAddr) -> ResolvedLocation {
        if let Some(location) = self.cache.get(&ip) {
            trace!(%ip, "Session cache hit");
            return location.clone();
        }

        let location = self.resolver.lookup(ip).await;
        self.cache.insert(ip, location.clone());
        location
    }

    /// Number of distinct addresses looked up so far.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
