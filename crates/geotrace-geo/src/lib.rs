//! IP geolocation for geotrace hops.
//!
//! Lookups go to the local MaxMind database first and fall back to a remote
//! HTTP API when the local answer is incomplete. Results are cached per
//! [`GeoSession`], which lives exactly as long as one trace.

mod error;
mod local;
mod remote;
mod resolver;

pub use error::GeoError;
pub use local::{AsnRecord, CityRecord, LocalGeoDb, MaxMindDb};
pub use remote::{IpInfoClient, RemoteGeoApi, RemoteLocation};
pub use resolver::{GeoResolver, GeoSession};

/// Default City database file.
pub const DEFAULT_CITY_DB: &str = "GeoLite2-City.mmdb";

/// Default ASN database file.
pub const DEFAULT_ASN_DB: &str = "GeoLite2-ASN.mmdb";

/// Default remote geolocation endpoint.
pub const DEFAULT_API_URL: &str = "https://ipinfo.io";

/// Default remote request timeout in milliseconds.
pub const DEFAULT_API_TIMEOUT_MS: u64 = 4000;
