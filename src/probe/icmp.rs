use std::io::ErrorKind;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use pnet::packet::icmp::destination_unreachable::DestinationUnreachablePacket;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::{EchoRequestPacket, MutableEchoRequestPacket};
use pnet::packet::icmp::time_exceeded::TimeExceededPacket;
use pnet::packet::icmp::{checksum, IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::icmpv6::echo_reply::EchoReplyPacket as EchoReplyV6Packet;
use pnet::packet::icmpv6::echo_request::EchoRequestPacket as EchoRequestV6Packet;
use pnet::packet::icmpv6::echo_request::MutableEchoRequestPacket as MutableEchoRequestV6Packet;
use pnet::packet::icmpv6::{Icmpv6Code, Icmpv6Packet, Icmpv6Types};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::{MutablePacket, Packet};
use socket2::{Domain, Protocol, Socket, Type};

use super::{ProbeOutcome, ProbeTransport};

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;
/// IPv6 headers have no length field ambiguity, always 40 bytes
const IPV6_HEADER_SIZE: usize = 40;
/// Echo payload carried by each probe
const PAYLOAD_SIZE: usize = 24;
/// Receive buffer, large enough for any quoted reply
const MAX_REPLY_SIZE: usize = 512;

/// Blocking ICMP echo transport.
///
/// Each probe opens its own socket, sets the requested TTL and waits for a
/// matching Echo Reply, Time Exceeded or Destination Unreachable message
/// until the per-probe timeout expires. Socket errors and timeouts surface
/// to the caller, which records them as loss.
pub struct IcmpTransport {
    /// True when raw sockets are unavailable and unprivileged DGRAM ICMP
    /// sockets are used instead. The kernel rewrites the echo identifier on
    /// DGRAM sockets, so replies are then matched on sequence alone.
    dgram: bool,
}

impl IcmpTransport {
    /// Probe socket capabilities: prefer raw ICMP, fall back to
    /// unprivileged DGRAM ICMP where the platform allows it.
    pub fn new() -> Result<Self> {
        if open_socket(false, Type::RAW).is_ok() {
            return Ok(Self { dgram: false });
        }
        if open_socket(false, Type::DGRAM).is_ok() {
            log::warn!("raw sockets unavailable, falling back to unprivileged ICMP");
            return Ok(Self { dgram: true });
        }
        Err(anyhow!(
            "insufficient permissions for ICMP sockets\n\n\
             Fix options:\n\
             \u{2022} Run with sudo\n\
             \u{2022} Add capability: sudo setcap cap_net_raw+ep <binary>\n\
             \u{2022} Enable unprivileged ICMP: sudo sysctl -w net.ipv4.ping_group_range='0 65534'"
        ))
    }

    fn probe(
        &self,
        source: IpAddr,
        dest: IpAddr,
        ttl: u8,
        ident: u16,
        timeout: Duration,
        seq: u16,
    ) -> Result<ProbeOutcome> {
        let ipv6 = dest.is_ipv6();
        let ty = if self.dgram { Type::DGRAM } else { Type::RAW };
        let socket = open_socket(ipv6, ty)?;

        if !source.is_unspecified() {
            socket
                .bind(&SocketAddr::new(source, 0).into())
                .with_context(|| format!("failed to bind probe socket to {}", source))?;
        }

        if ipv6 {
            socket.set_unicast_hops_v6(u32::from(ttl))?;
        } else {
            socket.set_ttl(u32::from(ttl))?;
        }

        let request = if ipv6 {
            build_echo_request_v6(ident, seq)
        } else {
            build_echo_request(ident, seq)
        };

        let sent_at = Instant::now();
        socket.send_to(&request, &SocketAddr::new(dest, 0).into())?;
        let deadline = sent_at + timeout;

        let mut buf = [MaybeUninit::<u8>::uninit(); MAX_REPLY_SIZE];
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(ProbeOutcome::failure(ident, seq));
            }
            // sub-millisecond timeouts truncate to zero on some platforms,
            // which would block forever
            socket.set_read_timeout(Some((deadline - now).max(Duration::from_millis(1))))?;

            let (len, from) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(ProbeOutcome::failure(ident, seq));
                }
                Err(e) => return Err(e.into()),
            };
            let data = unsafe { std::slice::from_raw_parts(buf.as_ptr().cast::<u8>(), len) };
            let Some(responder) = from.as_socket().map(|s| s.ip()) else {
                continue;
            };

            let matched = if ipv6 {
                match_reply_v6(data, ident, seq, self.dgram)
            } else {
                match_reply_v4(data, ident, seq, self.dgram)
            };
            if matched {
                return Ok(ProbeOutcome {
                    success: true,
                    elapsed: sent_at.elapsed(),
                    addr: responder.to_string(),
                    ident,
                    seq,
                });
            }
        }
    }
}

impl ProbeTransport for IcmpTransport {
    fn probe_v4(
        &self,
        source: IpAddr,
        dest: IpAddr,
        ttl: u8,
        ident: u16,
        timeout: Duration,
        seq: u16,
    ) -> Result<ProbeOutcome> {
        if !dest.is_ipv4() {
            return Err(anyhow!("IPv4 probe requested for non-IPv4 destination {}", dest));
        }
        self.probe(source, dest, ttl, ident, timeout, seq)
    }

    fn probe_v6(
        &self,
        source: IpAddr,
        dest: IpAddr,
        ttl: u8,
        ident: u16,
        timeout: Duration,
        seq: u16,
    ) -> Result<ProbeOutcome> {
        if !dest.is_ipv6() {
            return Err(anyhow!("IPv6 probe requested for non-IPv6 destination {}", dest));
        }
        self.probe(source, dest, ttl, ident, timeout, seq)
    }
}

fn open_socket(ipv6: bool, ty: Type) -> Result<Socket> {
    let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
    let protocol = if ipv6 {
        Protocol::ICMPV6
    } else {
        Protocol::ICMPV4
    };
    let socket = Socket::new(domain, ty, Some(protocol))?;
    socket.set_nonblocking(false)?;
    Ok(socket)
}

/// Build an ICMP Echo Request with a pattern-filled payload.
fn build_echo_request(ident: u16, seq: u16) -> Vec<u8> {
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + PAYLOAD_SIZE];

    let mut packet = MutableEchoRequestPacket::new(&mut buffer).unwrap();
    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_identifier(ident);
    packet.set_sequence_number(seq);
    for (i, byte) in packet.payload_mut().iter_mut().enumerate() {
        *byte = (i & 0xff) as u8;
    }

    let cksum = checksum(&IcmpPacket::new(&buffer).unwrap());
    let mut packet = MutableEchoRequestPacket::new(&mut buffer).unwrap();
    packet.set_checksum(cksum);

    buffer
}

/// Build an ICMPv6 Echo Request. The checksum is left zero: it covers the
/// IPv6 pseudo-header, so the kernel fills it in on ICMPv6 sockets.
fn build_echo_request_v6(ident: u16, seq: u16) -> Vec<u8> {
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + PAYLOAD_SIZE];

    let mut packet = MutableEchoRequestV6Packet::new(&mut buffer).unwrap();
    packet.set_icmpv6_type(Icmpv6Types::EchoRequest);
    packet.set_icmpv6_code(Icmpv6Code::new(0));
    packet.set_identifier(ident);
    packet.set_sequence_number(seq);
    for (i, byte) in packet.payload_mut().iter_mut().enumerate() {
        *byte = (i & 0xff) as u8;
    }

    buffer
}

/// Match an incoming IPv4 ICMP message against the outstanding probe.
///
/// RAW sockets (and macOS DGRAM sockets) deliver the full IP datagram while
/// Linux DGRAM sockets deliver the bare ICMP message; the leading version
/// nibble distinguishes the two, since no ICMP reply type collides with 0x4X.
fn match_reply_v4(data: &[u8], ident: u16, seq: u16, dgram: bool) -> bool {
    let icmp_bytes = if data.first().map_or(false, |b| b >> 4 == 4) {
        let Some(ip) = Ipv4Packet::new(data) else {
            return false;
        };
        let header_len = usize::from(ip.get_header_length()) * 4;
        if data.len() <= header_len {
            return false;
        }
        &data[header_len..]
    } else {
        data
    };

    let Some(icmp) = IcmpPacket::new(icmp_bytes) else {
        return false;
    };
    match icmp.get_icmp_type() {
        IcmpTypes::EchoReply => {
            let Some(reply) = EchoReplyPacket::new(icmp_bytes) else {
                return false;
            };
            reply.get_sequence_number() == seq && (dgram || reply.get_identifier() == ident)
        }
        IcmpTypes::TimeExceeded => TimeExceededPacket::new(icmp_bytes)
            .map_or(false, |p| match_quoted_v4(p.payload(), ident, seq, dgram)),
        IcmpTypes::DestinationUnreachable => DestinationUnreachablePacket::new(icmp_bytes)
            .map_or(false, |p| match_quoted_v4(p.payload(), ident, seq, dgram)),
        _ => false,
    }
}

/// Match the original datagram quoted inside an ICMP error message.
fn match_quoted_v4(quoted: &[u8], ident: u16, seq: u16, dgram: bool) -> bool {
    let Some(ip) = Ipv4Packet::new(quoted) else {
        return false;
    };
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return false;
    }
    let header_len = usize::from(ip.get_header_length()) * 4;
    if quoted.len() < header_len + ICMP_HEADER_SIZE {
        return false;
    }
    let Some(request) = EchoRequestPacket::new(&quoted[header_len..]) else {
        return false;
    };
    request.get_icmp_type() == IcmpTypes::EchoRequest
        && request.get_sequence_number() == seq
        && (dgram || request.get_identifier() == ident)
}

/// Match an incoming ICMPv6 message against the outstanding probe.
/// ICMPv6 sockets never include the IPv6 header.
fn match_reply_v6(data: &[u8], ident: u16, seq: u16, dgram: bool) -> bool {
    let Some(icmp) = Icmpv6Packet::new(data) else {
        return false;
    };
    match icmp.get_icmpv6_type() {
        Icmpv6Types::EchoReply => {
            let Some(reply) = EchoReplyV6Packet::new(data) else {
                return false;
            };
            reply.get_sequence_number() == seq && (dgram || reply.get_identifier() == ident)
        }
        Icmpv6Types::TimeExceeded | Icmpv6Types::DestinationUnreachable => {
            // 4 unused bytes precede the quoted datagram
            let payload = icmp.payload();
            if payload.len() < 4 {
                return false;
            }
            match_quoted_v6(&payload[4..], ident, seq, dgram)
        }
        _ => false,
    }
}

fn match_quoted_v6(quoted: &[u8], ident: u16, seq: u16, dgram: bool) -> bool {
    let Some(ip) = Ipv6Packet::new(quoted) else {
        return false;
    };
    if ip.get_next_header() != IpNextHeaderProtocols::Icmpv6 {
        return false;
    }
    if quoted.len() < IPV6_HEADER_SIZE + ICMP_HEADER_SIZE {
        return false;
    }
    let Some(request) = EchoRequestV6Packet::new(&quoted[IPV6_HEADER_SIZE..]) else {
        return false;
    };
    request.get_icmpv6_type() == Icmpv6Types::EchoRequest
        && request.get_sequence_number() == seq
        && (dgram || request.get_identifier() == ident)
}
