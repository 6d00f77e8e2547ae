//! ICMP echo encoding and decoding.
//!
//! Both IPv4 and IPv6 echo messages share the same 8 byte header layout
//! (type, code, checksum, identifier, sequence number), so the ICMPv4 echo
//! packet accessors from pnet are used for both families. Only the type
//! constants and the checksum responsibility differ.

use std::net::IpAddr;

use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpType, checksum};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;

use crate::error::{DecodeError, EncodeError};

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;
/// Default payload size, giving the conventional 64 byte ping
pub const DEFAULT_PAYLOAD_SIZE: usize = 56;
/// Largest payload that fits the 16-bit length budget
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - ICMP_HEADER_SIZE;
/// Byte offset of the checksum field inside the ICMP header
pub const CHECKSUM_OFFSET: usize = 2;

const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    pub fn echo_request_type(self) -> u8 {
        match self {
            AddressFamily::Ipv4 => ICMPV4_ECHO_REQUEST,
            AddressFamily::Ipv6 => ICMPV6_ECHO_REQUEST,
        }
    }

    pub fn echo_reply_type(self) -> u8 {
        match self {
            AddressFamily::Ipv4 => ICMPV4_ECHO_REPLY,
            AddressFamily::Ipv6 => ICMPV6_ECHO_REPLY,
        }
    }

    /// IPv6 leaves the checksum to the stack, which needs the pseudo-header.
    pub fn sender_computes_checksum(self) -> bool {
        self == AddressFamily::Ipv4
    }
}

/// Decoded ICMP header, fields in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence_number: u16,
}

/// A received ICMP message: the header, the whole message as it appeared on
/// the wire (without any IP header) and the bytes that follow the header.
#[derive(Debug, Clone, Copy)]
pub struct IcmpMessage<'a> {
    pub header: IcmpHeader,
    pub packet: &'a [u8],
    pub payload: &'a [u8],
}

/// Build an echo request. For IPv4 the checksum is filled in, for IPv6 it is
/// left as zero for the kernel to compute.
pub fn encode_echo_request(
    family: AddressFamily,
    identifier: u16,
    sequence_number: u16,
    payload: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(EncodeError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + payload.len()];
    {
        let mut echo_packet =
            MutableEchoRequestPacket::new(&mut buffer).expect("buffer holds an ICMP header");
        echo_packet.set_icmp_type(IcmpType::new(family.echo_request_type()));
        echo_packet.set_icmp_code(IcmpCode::new(0));
        echo_packet.set_checksum(0);
        echo_packet.set_identifier(identifier);
        echo_packet.set_sequence_number(sequence_number);
        echo_packet.set_payload(payload);
    }

    if family.sender_computes_checksum() {
        let echo_checksum =
            checksum(&IcmpPacket::new(&buffer).expect("buffer holds an ICMP header"));
        buffer[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&echo_checksum.to_be_bytes());
    }

    Ok(buffer)
}

/// Decode a received datagram. A leading IPv4 header, as delivered by raw
/// IPv4 sockets on most platforms, is detected and skipped. The checksum is
/// not validated.
pub fn decode_message(family: AddressFamily, bytes: &[u8]) -> Result<IcmpMessage<'_>, DecodeError> {
    let packet = match family {
        AddressFamily::Ipv4 => strip_ipv4_header(bytes),
        AddressFamily::Ipv6 => bytes,
    };

    let echo = EchoReplyPacket::new(packet).ok_or(DecodeError::Truncated { len: packet.len() })?;
    let header = IcmpHeader {
        icmp_type: echo.get_icmp_type().0,
        code: echo.get_icmp_code().0,
        checksum: echo.get_checksum(),
        identifier: echo.get_identifier(),
        sequence_number: echo.get_sequence_number(),
    };

    Ok(IcmpMessage {
        header,
        packet,
        payload: &packet[ICMP_HEADER_SIZE..],
    })
}

pub fn is_echo_reply(header: &IcmpHeader, family: AddressFamily) -> bool {
    header.icmp_type == family.echo_reply_type() && header.code == 0
}

/// One's-complement sum of 16-bit big-endian words, carries folded back in.
/// Running it over a message that carries a correct checksum yields zero.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

fn strip_ipv4_header(bytes: &[u8]) -> &[u8] {
    let Some(ipv4) = Ipv4Packet::new(bytes) else {
        return bytes;
    };
    let header_len = ipv4.get_header_length() as usize * 4;

    if ipv4.get_version() == 4
        && header_len >= Ipv4Packet::minimum_packet_size()
        && ipv4.get_next_level_protocol() == IpNextHeaderProtocols::Icmp
        && bytes.len() >= header_len + ICMP_HEADER_SIZE
    {
        &bytes[header_len..]
    } else {
        bytes
    }
}
