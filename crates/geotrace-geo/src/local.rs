//! Local geolocation tier backed by MaxMind databases.

use crate::GeoError;
use geotrace_core::{Coordinates, LocationSource, ResolvedLocation};
use maxminddb::{geoip2, Reader};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use tracing::{info, trace, warn};

/// Language used for place names.
const NAME_LOCALE: &str = "en";

/// City-level answer from the local database. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CityRecord {
    pub country: String,
    pub city: String,
    pub coordinates: Option<Coordinates>,
}

impl CityRecord {
    pub fn into_location(self) -> ResolvedLocation {
        ResolvedLocation {
            city: self.city,
            country: self.country,
            coordinates: self.coordinates,
            resolved: true,
            source: LocationSource::Local,
            asn: None,
        }
    }
}

/// Autonomous system owning an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsnRecord {
    pub number: u32,
    pub organization: String,
}

impl AsnRecord {
    /// "AS<number> <organization>".
    pub fn label(&self) -> String {
        if self.organization.is_empty() {
            format!("AS{}", self.number)
        } else {
            format!("AS{} {}", self.number, self.organization)
        }
    }
}

/// Read-only local lookup structure, shared by every trace session.
pub trait LocalGeoDb: Send + Sync {
    /// City record for `ip`, or `None` when the database has no entry.
    fn lookup_city(&self, ip: IpAddr) -> Option<CityRecord>;

    /// ASN record for `ip`. Databases without ASN data return `None`.
    fn lookup_asn(&self, _ip: IpAddr) -> Option<AsnRecord> {
        None
    }
}

/// MaxMind GeoLite2/GeoIP2 readers.
pub struct MaxMindDb {
    city: Reader<Vec<u8>>,
    asn: Option<Reader<Vec<u8>>>,
}

impl MaxMindDb {
    /// Opens the City database, and the ASN database when a path is given.
    ///
    /// A City database that cannot be opened is an error. A missing ASN
    /// database is logged and lookups continue without it.
    pub fn open(city_path: &Path, asn_path: Option<&Path>) -> Result<Self, GeoError> {
        let city = Reader::open_readfile(city_path).map_err(|source| GeoError::DatabaseOpen {
            kind: "City",
            path: city_path.display().to_string(),
            source,
        })?;
        info!(path = %city_path.display(), "Opened City database");

        let asn = asn_path.and_then(|path| match Reader::open_readfile(path) {
            Ok(reader) => {
                info!(path = %path.display(), "Opened ASN database");
                Some(reader)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ASN database not available, continuing without it");
                None
            }
        });

        Ok(Self { city, asn })
    }

    pub fn has_asn(&self) -> bool {
        self.asn.is_some()
    }
}

fn english_name(names: Option<BTreeMap<&str, &str>>) -> String {
    names
        .and_then(|names| names.get(NAME_LOCALE).copied())
        .unwrap_or_default()
        .to_string()
}

impl LocalGeoDb for MaxMindDb {
    fn lookup_city(&self, ip: IpAddr) -> Option<CityRecord> {
        let record: geoip2::City = match self.city.lookup(ip) {
            Ok(record) => record,
            Err(e) => {
                trace!(%ip, error = %e, "No City record");
                return None;
            }
        };

        let coordinates = record.location.and_then(|location| {
            match (location.latitude, location.longitude) {
                (Some(latitude), Some(longitude)) => Some(Coordinates {
                    latitude,
                    longitude,
                }),
                _ => None,
            }
        });

        Some(CityRecord {
            country: english_name(record.country.and_then(|country| country.names)),
            city: english_name(record.city.and_then(|city| city.names)),
            coordinates,
        })
    }

    fn lookup_asn(&self, ip: IpAddr) -> Option<AsnRecord> {
        let reader = self.asn.as_ref()?;
        let record: geoip2::Asn = reader.lookup(ip).ok()?;
        Some(AsnRecord {
            number: record.autonomous_system_number?,
            organization: record
                .autonomous_system_organization
                .unwrap_or_default()
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_city_db_fails() {
        let result = MaxMindDb::open(Path::new("/nonexistent/GeoLite2-City.mmdb"), None);
        match result {
            Err(GeoError::DatabaseOpen { kind, path, .. }) => {
                assert_eq!(kind, "City");
                assert!(path.ends_with("GeoLite2-City.mmdb"));
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected open to fail"),
        }
    }

    #[test]
    fn test_asn_label() {
        let record = AsnRecord {
            number: 15169,
            organization: "Google LLC".to_string(),
        };
        assert_eq!(record.label(), "AS15169 Google LLC");

        let bare = AsnRecord {
            number: 64500,
            organization: String::new(),
        };
        assert_eq!(bare.label(), "AS64500");
    }

    #[test]
    fn test_english_name() {
        let mut names = BTreeMap::new();
        names.insert("de", "Vereinigte Staaten");
        names.insert("en", "United States");
        assert_eq!(english_name(Some(names)), "United States");
        assert_eq!(english_name(None), "");
    }

    #[test]
    fn test_city_record_into_location() {
        let location = CityRecord {
            country: "Germany".to_string(),
            city: String::new(),
            coordinates: None,
        }
        .into_location();
        assert_eq!(location.source, LocationSource::Local);
        assert!(!location.is_complete());
    }
}
