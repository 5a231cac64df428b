//! Core types, traits, and error handling for geotrace.
//!
//! This crate provides the fundamental abstractions shared by the probing
//! engine, the geolocation tiers, and the streaming server:
//!
//! - [`ProbeEngine`] trait for path-probing implementations
//! - [`RawHop`], [`ResolvedLocation`] and [`HopRecord`] data types
//! - [`TraceError`] and [`ProbeError`] for error handling
//! - [`hop::transform`] for turning a probe reply into an output record

pub mod error;
pub mod hop;
pub mod traits;
pub mod types;

pub use error::{ProbeError, TraceError};
pub use hop::transform;
pub use traits::{HopSender, ProbeEngine};
pub use types::{
    Coordinates, HopEvent, HopRecord, HopReply, LocationSource, RawHop, ResolvedLocation,
    TraceRequest, TraceSummary, DEFAULT_MAX_RTT_SECS, DEFAULT_MAX_TTL, UNKNOWN,
};
