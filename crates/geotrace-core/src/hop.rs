//! Conversion of probe replies into output records.

use crate::{HopRecord, HopReply, ResolvedLocation};
use std::time::Duration;

/// Builds the record for one answered probe.
pub fn transform(reply: &HopReply, location: &ResolvedLocation, number: usize) -> HopRecord {
    HopRecord {
        number,
        ip: reply.addr.to_string(),
        host: strip_root_dot(&reply.host).to_string(),
        rtt: format_rtt(reply.rtt),
        location: location.display_label(),
        coordinates: location.coordinates_text(),
        asn: location.asn.clone(),
    }
}

/// Removes exactly one trailing root-label dot.
pub fn strip_root_dot(host: &str) -> &str {
    host.strip_suffix('.').unwrap_or(host)
}

/// Milliseconds with three decimals, rounded half-up on the microsecond.
pub fn format_rtt(rtt: Duration) -> String {
    let micros = (rtt.as_nanos() + 500) / 1_000;
    format!("{}.{:03}", micros / 1_000, micros % 1_000)
}
