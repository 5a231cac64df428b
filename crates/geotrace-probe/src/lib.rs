//! ICMP probing engine.
//!
//! Implements [`geotrace_core::ProbeEngine`] by sending ICMP echo requests
//! with increasing TTL over a raw socket and reporting each reply (or
//! timeout) as it happens.

mod dns;
mod engine;
mod packet;
#[cfg(target_os = "linux")]
mod socket;

pub use dns::Dns;
pub use engine::IcmpEngine;
pub use packet::{echo_request, parse_reply, ProbeMatch};
