//! Serial ICMP probing engine.
//!
//! Sends one probe at a time and waits for its answer (or the per-probe
//! timeout) before moving to the next TTL. Every outcome is delivered to
//! the consumer as soon as it is known.

use crate::Dns;
use async_trait::async_trait;
use geotrace_core::{HopSender, ProbeEngine, TraceError, TraceRequest};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU16, Ordering};
use tracing::info;

/// Echo ID counter for unique IDs across concurrent traces.
static ECHO_ID_COUNTER: AtomicU16 = AtomicU16::new(0);

/// Gets the next echo ID, offset by the process id so that two servers on
/// one host do not collide.
fn next_echo_id() -> u16 {
    (std::process::id() as u16).wrapping_add(ECHO_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// ICMP traceroute engine (IPv4).
pub struct IcmpEngine {
    dns: Dns,
}

impl IcmpEngine {
    pub fn new(dns: Dns) -> Self {
        Self { dns }
    }

    async fn resolve_v4(&self, target: &str) -> Result<Ipv4Addr, TraceError> {
        match self.dns.resolve_target(target).await? {
            IpAddr::V4(ip) => Ok(ip),
            IpAddr::V6(ip) => Err(TraceError::Unsupported(format!(
                "{} resolves to IPv6 address {}",
                target, ip
            ))),
        }
    }
}

#[async_trait]
impl ProbeEngine for IcmpEngine {
    fn name(&self) -> &'static str {
        "icmp"
    }

    async fn run_trace(&self, request: TraceRequest, hops: HopSender) -> Result<(), TraceError> {
        request.validate()?;
        let target = self.resolve_v4(&request.target).await?;
        info!(target = %request.target, ip = %target, max_ttl = request.max_ttl, "Probing path");

        #[cfg(target_os = "linux")]
        return linux::probe_path(&self.dns, target, &request, &hops).await;

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (target, hops);
            Err(TraceError::DriverNotAvailable)
        }
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::next_echo_id;
    use crate::packet::{echo_request, parse_reply, ProbeMatch};
    use crate::socket::IcmpSocket;
    use crate::Dns;
    use geotrace_core::{
        HopEvent, HopReply, HopSender, ProbeError, RawHop, TraceError, TraceRequest,
    };
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::time::{timeout, Instant};
    use tracing::{debug, trace};

    const READ_BUFFER_LEN: usize = 1500;

    pub(super) async fn probe_path(
        dns: &Dns,
        target: Ipv4Addr,
        request: &TraceRequest,
        hops: &HopSender,
    ) -> Result<(), TraceError> {
        let socket = IcmpSocket::open(request.source_v4)?;
        let echo_id = next_echo_id();
        let mut names = dns.reverse_cache();
        let mut buffer = vec![0u8; READ_BUFFER_LEN];

        for ttl in 1..=request.max_ttl {
            socket.set_ttl(ttl)?;
            let packet = echo_request(echo_id, u16::from(ttl))?;
            let send_time = Instant::now();

            debug!(ttl = ttl, echo_id = echo_id, "Sending probe");
            socket.send_to(&packet, target).await?;

            let waited = timeout(
                request.probe_timeout,
                wait_for_reply(&socket, &mut buffer, echo_id, target, ttl),
            )
            .await;

            let (hop, reached) = match waited {
                Ok(Ok(found)) => {
                    let rtt = send_time.elapsed();
                    let addr = IpAddr::V4(found.from);
                    debug!(
                        ttl = ttl,
                        ip = %addr,
                        rtt_ms = rtt.as_secs_f64() * 1000.0,
                        is_dest = found.is_dest,
                        "Received probe response"
                    );
                    let host = names.name_of(addr).await;
                    (RawHop::replied(ttl, HopReply { addr, rtt, host }), found.is_dest)
                }
                Ok(Err(e)) => {
                    debug!(ttl = ttl, error = %e, "Fatal error during receive");
                    return Err(e);
                }
                Err(_) => {
                    debug!(ttl = ttl, "Timeout waiting for response");
                    (
                        RawHop::failed(ttl, ProbeError::Timeout(request.probe_timeout)),
                        false,
                    )
                }
            };

            hops.send(HopEvent { hop, round: 0 })
                .await
                .map_err(|_| TraceError::Cancelled)?;

            if reached {
                debug!("Reached destination, stopping");
                break;
            }
        }

        Ok(())
    }

    async fn wait_for_reply(
        socket: &IcmpSocket,
        buffer: &mut [u8],
        echo_id: u16,
        target: Ipv4Addr,
        ttl: u8,
    ) -> Result<ProbeMatch, TraceError> {
        loop {
            let n = socket.recv(buffer).await?;
            match parse_reply(&buffer[..n], echo_id, target) {
                Some(found) if found.seq == u16::from(ttl) => return Ok(found),
                Some(found) => {
                    trace!(expected = ttl, actual = found.seq, "Ignored late reply");
                }
                None => trace!("Ignored unrelated ICMP packet"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_id_uniqueness() {
        let id1 = next_echo_id();
        let id2 = next_echo_id();
        let id3 = next_echo_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }
}
