// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Link-layer framing for PIM messages
//!
//! Outbound: wraps an encoded PIM message in IPv4 (TTL 1, protocol 103) and
//! Ethernet, with an optional single 802.1Q tag.
//!
//! Inbound: validates the Ethernet/VLAN/IPv4 chain and the PIM header and
//! checksum, and hands back the PIM message with its link-layer context.

use std::net::Ipv4Addr;

use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use pnet::packet::vlan::MutableVlanPacket;
use pnet::util::MacAddr;
use thiserror::Error;

use crate::mroute::McastRoute;
use crate::protocols::pim::{
    parse_message, JoinPruneBuilder, PimHeader, PimHelloBuilder, PimParseError, ALL_PIM_ROUTERS,
    ALL_PIM_ROUTERS_MAC, IP_PROTOCOL_PIM,
};
use crate::protocols::PacketBuilder;

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const IPV4_HEADER_LEN: usize = 20;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;

/// DSCP CS6 (internetwork control), TOS byte 0xc0
const DSCP_NETWORK_CONTROL: u8 = 0x30;
const PIM_TTL: u8 = 1;

/// Errors that can occur while framing or unframing a PIM packet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Invalid EtherType: expected 0x0800 (IPv4), got {0:#06x}")]
    InvalidEtherType(u16),

    #[error("Invalid IP version: expected 4, got {0}")]
    InvalidIpVersion(u8),

    #[error("IP header length too small: {0} words")]
    IpHeaderTooSmall(u8),

    #[error("Invalid IP protocol: expected 103 (PIM), got {0}")]
    InvalidIpProtocol(u8),

    #[error("IP total length {total} inconsistent with header length {header} and frame size {available}")]
    BadIpLength {
        total: usize,
        header: usize,
        available: usize,
    },

    #[error("PIM message too large to frame: {0} bytes")]
    PayloadTooLarge(usize),

    #[error(transparent)]
    Pim(#[from] PimParseError),
}

/// Local link addressing used as the source of outbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAddress {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub vlan: Option<u16>,
}

/// Decoded inbound PIM frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PimFrame {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub vlan: Option<u16>,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub header: PimHeader,
    /// Whole PIM message, header included
    pub message: Vec<u8>,
}

impl PimFrame {
    /// PIM message body after the common header
    pub fn body(&self) -> &[u8] {
        &self.message[PimHeader::LEN..]
    }
}

/// Wrap an encoded PIM message for transmission
pub fn encapsulate(
    link: &LinkAddress,
    dst_mac: MacAddr,
    dst_ip: Ipv4Addr,
    pim: &[u8],
) -> Result<Vec<u8>, FrameError> {
    let ip_total = IPV4_HEADER_LEN + pim.len();
    if ip_total > u16::MAX as usize {
        return Err(FrameError::PayloadTooLarge(pim.len()));
    }

    let tag_len = if link.vlan.is_some() { VLAN_TAG_LEN } else { 0 };
    let ip_offset = ETHERNET_HEADER_LEN + tag_len;
    let mut buf = vec![0u8; ip_offset + ip_total];
    let too_short = FrameError::TooShort {
        expected: ip_offset + ip_total,
        actual: buf.len(),
    };

    {
        let mut eth = MutableEthernetPacket::new(&mut buf[..ETHERNET_HEADER_LEN])
            .ok_or_else(|| too_short.clone())?;
        eth.set_destination(dst_mac);
        eth.set_source(link.mac);
        eth.set_ethertype(if link.vlan.is_some() {
            EtherTypes::Vlan
        } else {
            EtherTypes::Ipv4
        });
    }

    if let Some(vlan_id) = link.vlan {
        let mut tag = MutableVlanPacket::new(&mut buf[ETHERNET_HEADER_LEN..ip_offset])
            .ok_or_else(|| too_short.clone())?;
        tag.set_vlan_identifier(vlan_id & 0x0FFF);
        tag.set_ethertype(EtherTypes::Ipv4);
    }

    let mut ip = MutableIpv4Packet::new(&mut buf[ip_offset..]).ok_or(too_short)?;
    ip.set_version(4);
    ip.set_header_length(5);
    ip.set_dscp(DSCP_NETWORK_CONTROL);
    ip.set_total_length(ip_total as u16);
    ip.set_ttl(PIM_TTL);
    ip.set_next_level_protocol(IpNextHeaderProtocols::Pim);
    ip.set_source(link.ip);
    ip.set_destination(dst_ip);
    ip.set_payload(pim);
    let checksum = ipv4::checksum(&ip.to_immutable());
    ip.set_checksum(checksum);

    Ok(buf)
}

/// Hello frame to ALL-PIM-ROUTERS
pub fn build_hello(link: &LinkAddress, hello: &PimHelloBuilder) -> Result<Vec<u8>, FrameError> {
    encapsulate(
        link,
        MacAddr::from(ALL_PIM_ROUTERS_MAC),
        ALL_PIM_ROUTERS,
        &hello.build(),
    )
}

/// Single (S,G) Join or Prune towards `upstream`
///
/// The IP destination is ALL-PIM-ROUTERS; the Ethernet destination is the
/// upstream router's MAC.
pub fn build_join_prune(
    link: &LinkAddress,
    route: &McastRoute,
    upstream: Ipv4Addr,
    upstream_mac: MacAddr,
    holdtime_secs: u16,
    is_join: bool,
) -> Result<Vec<u8>, FrameError> {
    let message = JoinPruneBuilder::new(upstream, holdtime_secs)
        .add_source(route.source, route.group, is_join)
        .build();
    encapsulate(link, upstream_mac, ALL_PIM_ROUTERS, &message)
}

fn mac_at(data: &[u8]) -> MacAddr {
    MacAddr::new(data[0], data[1], data[2], data[3], data[4], data[5])
}

/// Offset of the IPv4 header and the VLAN id, if the frame carries IPv4
fn ip_offset(data: &[u8]) -> Result<(usize, Option<u16>), FrameError> {
    if data.len() < ETHERNET_HEADER_LEN {
        return Err(FrameError::TooShort {
            expected: ETHERNET_HEADER_LEN,
            actual: data.len(),
        });
    }

    let ether_type = u16::from_be_bytes([data[12], data[13]]);
    match ether_type {
        ETHERTYPE_IPV4 => Ok((ETHERNET_HEADER_LEN, None)),
        ETHERTYPE_VLAN => {
            let end = ETHERNET_HEADER_LEN + VLAN_TAG_LEN;
            if data.len() < end {
                return Err(FrameError::TooShort {
                    expected: end,
                    actual: data.len(),
                });
            }
            let tci = u16::from_be_bytes([data[14], data[15]]);
            let inner = u16::from_be_bytes([data[16], data[17]]);
            if inner != ETHERTYPE_IPV4 {
                return Err(FrameError::InvalidEtherType(inner));
            }
            Ok((end, Some(tci & 0x0FFF)))
        }
        other => Err(FrameError::InvalidEtherType(other)),
    }
}

/// Cheap prefilter: IPv4 (optionally VLAN tagged) carrying protocol 103
pub fn is_pim_frame(data: &[u8]) -> bool {
    match ip_offset(data) {
        Ok((offset, _)) => data.len() > offset + 9 && data[offset + 9] == IP_PROTOCOL_PIM,
        Err(_) => false,
    }
}

/// Parse a raw link-layer frame into a verified PIM message
pub fn decode_frame(data: &[u8]) -> Result<PimFrame, FrameError> {
    let (offset, vlan) = ip_offset(data)?;
    let ip = &data[offset..];

    if ip.len() < IPV4_HEADER_LEN {
        return Err(FrameError::TooShort {
            expected: offset + IPV4_HEADER_LEN,
            actual: data.len(),
        });
    }

    let version = (ip[0] >> 4) & 0x0F;
    if version != 4 {
        return Err(FrameError::InvalidIpVersion(version));
    }

    let ihl = ip[0] & 0x0F;
    if ihl < 5 {
        return Err(FrameError::IpHeaderTooSmall(ihl));
    }

    let protocol = ip[9];
    if protocol != IP_PROTOCOL_PIM {
        return Err(FrameError::InvalidIpProtocol(protocol));
    }

    // Trailing Ethernet padding is allowed; a total length past the end is not
    let header_len = (ihl as usize) * 4;
    let total_len = u16::from_be_bytes([ip[2], ip[3]]) as usize;
    if total_len < header_len || total_len > ip.len() {
        return Err(FrameError::BadIpLength {
            total: total_len,
            header: header_len,
            available: ip.len(),
        });
    }

    let message = &ip[header_len..total_len];
    let (header, _) = parse_message(message)?;

    Ok(PimFrame {
        dst_mac: mac_at(&data[0..6]),
        src_mac: mac_at(&data[6..12]),
        vlan,
        src_ip: Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]),
        dst_ip: Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]),
        header,
        message: message.to_vec(),
    })
}
