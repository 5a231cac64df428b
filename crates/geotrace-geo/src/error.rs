//! Error types for geolocation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeoError {
    #[error("Failed to open {kind} database {path}: {source}")]
    DatabaseOpen {
        kind: &'static str,
        path: String,
        #[source]
        source: maxminddb::MaxMindDBError,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Geolocation request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Geolocation API returned status {0}")]
    Status(u16),

    #[error("Malformed geolocation response: {0}")]
    Malformed(String),
}
