//! ICMP echo construction and reply matching using pnet.

use geotrace_core::TraceError;
use pnet_packet::icmp::echo_reply::EchoReplyPacket;
use pnet_packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet_packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::Packet;
use std::net::Ipv4Addr;

/// ICMP echo header: type, code, checksum, identifier, sequence.
const ECHO_HEADER_LEN: usize = 8;

/// Time Exceeded and Unreachable carry 4 unused bytes before the quoted packet.
const ERROR_HEADER_LEN: usize = 4;

const ECHO_PAYLOAD: &[u8] = b"geotrace";

/// A reply that belongs to one of our probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeMatch {
    /// The router or host that answered.
    pub from: Ipv4Addr,
    /// Sequence number of the probe, which is its TTL.
    pub seq: u16,
    /// Whether the answer came from the target itself.
    pub is_dest: bool,
}

/// Creates an ICMP Echo Request (without IP header) for the kernel to wrap.
pub fn echo_request(echo_id: u16, seq: u16) -> Result<Vec<u8>, TraceError> {
    let mut buffer = vec![0u8; ECHO_HEADER_LEN + ECHO_PAYLOAD.len()];

    {
        let mut echo = MutableEchoRequestPacket::new(&mut buffer)
            .ok_or_else(|| TraceError::Internal("Failed to create ICMP packet".to_string()))?;
        echo.set_icmp_type(IcmpTypes::EchoRequest);
        echo.set_icmp_code(IcmpCode::new(0));
        echo.set_identifier(echo_id);
        echo.set_sequence_number(seq);
        echo.set_payload(ECHO_PAYLOAD);
    }

    let checksum = {
        let view = IcmpPacket::new(&buffer)
            .ok_or_else(|| TraceError::Internal("Failed to create ICMP view".to_string()))?;
        pnet_packet::icmp::checksum(&view)
    };
    buffer[2..4].copy_from_slice(&checksum.to_be_bytes());

    Ok(buffer)
}

fn ipv4_payload<'a>(ip: &Ipv4Packet<'_>, raw: &'a [u8]) -> Option<&'a [u8]> {
    raw.get(usize::from(ip.get_header_length()) * 4..)
}

/// Matches a packet read from a raw ICMP socket (IPv4 header included)
/// against the probes of one trace.
///
/// Returns `None` for anything that is not an answer to `echo_id` sent
/// towards `target`.
pub fn parse_reply(buf: &[u8], echo_id: u16, target: Ipv4Addr) -> Option<ProbeMatch> {
    let ip = Ipv4Packet::new(buf)?;
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return None;
    }
    let from = ip.get_source();
    let icmp_bytes = ipv4_payload(&ip, buf)?;
    let icmp = IcmpPacket::new(icmp_bytes)?;

    match icmp.get_icmp_type() {
        IcmpTypes::EchoReply => {
            let reply = EchoReplyPacket::new(icmp_bytes)?;
            if reply.get_identifier() != echo_id || from != target {
                return None;
            }
            Some(ProbeMatch {
                from,
                seq: reply.get_sequence_number(),
                is_dest: true,
            })
        }
        IcmpTypes::TimeExceeded | IcmpTypes::DestinationUnreachable => {
            let quoted = icmp.payload().get(ERROR_HEADER_LEN..)?;
            let inner = Ipv4Packet::new(quoted)?;
            if inner.get_destination() != target
                || inner.get_next_level_protocol() != IpNextHeaderProtocols::Icmp
            {
                return None;
            }

            let echo = ipv4_payload(&inner, quoted)?.get(..ECHO_HEADER_LEN)?;
            if echo[0] != IcmpTypes::EchoRequest.0 {
                return None;
            }
            let id = u16::from_be_bytes([echo[4], echo[5]]);
            if id != echo_id {
                return None;
            }

            Some(ProbeMatch {
                from,
                seq: u16::from_be_bytes([echo[6], echo[7]]),
                is_dest: from == target,
            })
        }
        _ => None,
    }
}
