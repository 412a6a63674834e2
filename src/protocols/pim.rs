// SPDX-License-Identifier: Apache-2.0 OR MIT
//! PIM-SM message codec (RFC 7761 subset)
//!
//! Encodes and decodes the PIM messages a link engine exchanges with its
//! neighbors:
//! - Hello (neighbor discovery, DR priority, generation ID)
//! - Join/Prune (upstream tree maintenance)
//!
//! ## Key Addresses
//!
//! | Address | Purpose |
//! |---------|---------|
//! | 224.0.0.13 | ALL-PIM-ROUTERS |
//! | 01:00:5e:00:00:0d | ALL-PIM-ROUTERS MAC |
//! | IP Protocol 103 | PIM packets |
//!
//! ## Message Types
//!
//! | Type | Value | Description |
//! |------|-------|-------------|
//! | Hello | 0 | Neighbor discovery |
//! | Register | 1 | First-hop to RP (not handled) |
//! | Register-Stop | 2 | RP to first-hop (not handled) |
//! | Join/Prune | 3 | Tree maintenance |
//! | Bootstrap | 4 | BSR election (not handled) |
//! | Assert | 5 | Forwarder election (not handled) |

use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;

use super::PacketBuilder;

pub const PIM_VERSION: u8 = 2;
pub const IP_PROTOCOL_PIM: u8 = 103;

// PIM message types
pub const PIM_HELLO: u8 = 0;
pub const PIM_REGISTER: u8 = 1;
pub const PIM_REGISTER_STOP: u8 = 2;
pub const PIM_JOIN_PRUNE: u8 = 3;
pub const PIM_BOOTSTRAP: u8 = 4;
pub const PIM_ASSERT: u8 = 5;
pub const PIM_GRAFT: u8 = 6;
pub const PIM_GRAFT_ACK: u8 = 7;
pub const PIM_CANDIDATE_RP: u8 = 8;

// Hello option types
pub const PIM_HELLO_HOLDTIME: u16 = 1;
pub const PIM_HELLO_LAN_PRUNE_DELAY: u16 = 2;
pub const PIM_HELLO_DR_PRIORITY: u16 = 19;
pub const PIM_HELLO_GENERATION_ID: u16 = 20;
pub const PIM_HELLO_ADDRESS_LIST: u16 = 24;

// Default timer values (RFC 7761)
pub const DEFAULT_HELLO_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_HELLO_HOLDTIME: Duration = Duration::from_secs(105); // 3.5 * Hello Period
pub const DEFAULT_JOIN_PRUNE_PERIOD: Duration = Duration::from_secs(60);
pub const DEFAULT_DR_PRIORITY: u32 = 1;
pub const DEFAULT_PROPAGATION_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_OVERRIDE_INTERVAL: Duration = Duration::from_millis(2500);

/// All PIM routers multicast address (224.0.0.13)
pub const ALL_PIM_ROUTERS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 13);

/// Ethernet address mapped from 224.0.0.13
pub const ALL_PIM_ROUTERS_MAC: [u8; 6] = [0x01, 0x00, 0x5e, 0x00, 0x00, 0x0d];

/// Address family number for IPv4 in encoded addresses
const ADDR_FAMILY_IPV4: u8 = 1;
/// Native encoding for the address family
const ENCODING_NATIVE: u8 = 0;

const ENCODED_UNICAST_LEN: usize = 6;
const ENCODED_GROUP_LEN: usize = 8;
const ENCODED_SOURCE_LEN: usize = 8;

// Encoded-Source flag bits
const SOURCE_FLAG_SPARSE: u8 = 0x04;
const SOURCE_FLAG_WILDCARD: u8 = 0x02;
const SOURCE_FLAG_RPT: u8 = 0x01;

/// Join/Prune holdtime = period * 3.5, saturating at `Duration::MAX`
pub fn join_prune_holdtime(join_period: Duration) -> Duration {
    join_period
        .checked_mul(7)
        .map_or(Duration::MAX, |d| d / 2)
}

/// Errors that can occur while decoding a PIM message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PimParseError {
    #[error("PIM message too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Unsupported PIM version {0}")]
    UnsupportedVersion(u8),

    #[error("PIM checksum mismatch (residual {0:#06x})")]
    BadChecksum(u16),

    #[error("Unexpected PIM message type: expected {expected}, got {actual}")]
    UnexpectedType { expected: u8, actual: u8 },

    #[error("Unsupported address family {0} in encoded address")]
    UnsupportedAddressFamily(u8),

    #[error("Unsupported address encoding {0} in encoded address")]
    UnsupportedEncoding(u8),

    #[error("Truncated {0}")]
    Truncated(&'static str),
}

/// Parsed PIM header (common header for all PIM messages)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PimHeader {
    /// PIM version (must be 2)
    pub version: u8,
    /// Message type
    pub msg_type: u8,
    /// Reserved field
    pub reserved: u8,
    /// Checksum
    pub checksum: u16,
}

impl PimHeader {
    pub const LEN: usize = 4;

    /// Parse a PIM header from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self, PimParseError> {
        if data.len() < Self::LEN {
            return Err(PimParseError::TooShort {
                expected: Self::LEN,
                actual: data.len(),
            });
        }

        let ver_type = data[0];
        let version = (ver_type >> 4) & 0x0F;
        let msg_type = ver_type & 0x0F;

        if version != PIM_VERSION {
            return Err(PimParseError::UnsupportedVersion(version));
        }

        Ok(Self {
            version,
            msg_type,
            reserved: data[1],
            checksum: u16::from_be_bytes([data[2], data[3]]),
        })
    }

    /// Get the message type as a string
    pub fn type_name(&self) -> &'static str {
        match self.msg_type {
            PIM_HELLO => "Hello",
            PIM_REGISTER => "Register",
            PIM_REGISTER_STOP => "Register-Stop",
            PIM_JOIN_PRUNE => "Join/Prune",
            PIM_BOOTSTRAP => "Bootstrap",
            PIM_ASSERT => "Assert",
            PIM_GRAFT => "Graft",
            PIM_GRAFT_ACK => "Graft-Ack",
            PIM_CANDIDATE_RP => "Candidate-RP",
            _ => "Unknown",
        }
    }
}

/// Split a whole PIM message into its verified header and body.
///
/// The checksum covers the entire PIM message, so summing it including the
/// checksum field must fold to zero.
pub fn parse_message(data: &[u8]) -> Result<(PimHeader, &[u8]), PimParseError> {
    let header = PimHeader::parse(data)?;
    let residual = super::internet_checksum(data);
    if residual != 0 {
        return Err(PimParseError::BadChecksum(residual));
    }
    Ok((header, &data[PimHeader::LEN..]))
}

fn push_header(packet: &mut Vec<u8>, msg_type: u8) {
    packet.push((PIM_VERSION << 4) | msg_type);
    packet.push(0); // Reserved
    packet.push(0); // Checksum placeholder
    packet.push(0);
}

fn finish_checksum(packet: &mut [u8], checksum: u16) {
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
}

/// LAN Prune Delay option payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanPruneDelay {
    /// Join suppression disabled (T bit)
    pub tracking: bool,
    /// Propagation delay in milliseconds (15 bits)
    pub propagation_delay_ms: u16,
    /// Override interval in milliseconds
    pub override_interval_ms: u16,
}

impl LanPruneDelay {
    pub fn new(propagation_delay: Duration, override_interval: Duration) -> Self {
        Self {
            tracking: false,
            propagation_delay_ms: (propagation_delay.as_millis().min(0x7FFF)) as u16,
            override_interval_ms: (override_interval.as_millis().min(u16::MAX as u128)) as u16,
        }
    }

    fn encode(&self) -> [u8; 4] {
        let first = (self.propagation_delay_ms & 0x7FFF) | if self.tracking { 0x8000 } else { 0 };
        let [a, b] = first.to_be_bytes();
        let [c, d] = self.override_interval_ms.to_be_bytes();
        [a, b, c, d]
    }

    fn decode(data: &[u8]) -> Self {
        let first = u16::from_be_bytes([data[0], data[1]]);
        Self {
            tracking: first & 0x8000 != 0,
            propagation_delay_ms: first & 0x7FFF,
            override_interval_ms: u16::from_be_bytes([data[2], data[3]]),
        }
    }
}

/// Parsed PIM Hello option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PimHelloOption {
    /// Holdtime in seconds
    Holdtime(u16),
    /// LAN Prune Delay
    LanPruneDelay(LanPruneDelay),
    /// DR Priority
    DrPriority(u32),
    /// Generation ID
    GenerationId(u32),
    /// Unknown option
    Unknown { option_type: u16, data: Vec<u8> },
}

impl PimHelloOption {
    /// Parse Hello options from payload
    ///
    /// Fails if an option header or body runs past the end of the payload, or
    /// if a known option is shorter than its fixed value.
    pub fn parse_all(data: &[u8]) -> Result<Vec<Self>, PimParseError> {
        let mut options = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            if offset + 4 > data.len() {
                return Err(PimParseError::Truncated("Hello option header"));
            }
            let option_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let option_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4;

            if offset + option_len > data.len() {
                return Err(PimParseError::Truncated("Hello option value"));
            }

            let option_data = &data[offset..offset + option_len];
            offset += option_len;

            let option = match option_type {
                PIM_HELLO_HOLDTIME => {
                    let v = fixed::<2>(option_data, "Hello Holdtime option")?;
                    PimHelloOption::Holdtime(u16::from_be_bytes(v))
                }
                PIM_HELLO_LAN_PRUNE_DELAY => {
                    fixed::<4>(option_data, "Hello LAN Prune Delay option")?;
                    PimHelloOption::LanPruneDelay(LanPruneDelay::decode(option_data))
                }
                PIM_HELLO_DR_PRIORITY => {
                    let v = fixed::<4>(option_data, "Hello DR Priority option")?;
                    PimHelloOption::DrPriority(u32::from_be_bytes(v))
                }
                PIM_HELLO_GENERATION_ID => {
                    let v = fixed::<4>(option_data, "Hello Generation ID option")?;
                    PimHelloOption::GenerationId(u32::from_be_bytes(v))
                }
                _ => PimHelloOption::Unknown {
                    option_type,
                    data: option_data.to_vec(),
                },
            };

            options.push(option);
        }

        Ok(options)
    }
}

/// Leading `N` bytes of an option value
fn fixed<const N: usize>(data: &[u8], what: &'static str) -> Result<[u8; N], PimParseError> {
    data.get(..N)
        .and_then(|v| <[u8; N]>::try_from(v).ok())
        .ok_or(PimParseError::Truncated(what))
}

/// Decoded Hello message. Absent options stay `None`; defaults are applied
/// by the consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelloMessage {
    pub holdtime: Option<u16>,
    pub dr_priority: Option<u32>,
    pub generation_id: Option<u32>,
    pub lan_prune_delay: Option<LanPruneDelay>,
}

impl HelloMessage {
    /// Parse a Hello body (the bytes after the PIM header)
    pub fn parse(body: &[u8]) -> Result<Self, PimParseError> {
        let mut hello = Self::default();
        for option in PimHelloOption::parse_all(body)? {
            match option {
                PimHelloOption::Holdtime(h) => hello.holdtime = Some(h),
                PimHelloOption::LanPruneDelay(d) => hello.lan_prune_delay = Some(d),
                PimHelloOption::DrPriority(p) => hello.dr_priority = Some(p),
                PimHelloOption::GenerationId(g) => hello.generation_id = Some(g),
                PimHelloOption::Unknown { .. } => {}
            }
        }
        Ok(hello)
    }
}

/// Builder for PIM Hello packets
#[derive(Debug, Clone)]
pub struct PimHelloBuilder {
    /// Holdtime in seconds
    pub holdtime: u16,
    /// DR Priority
    pub dr_priority: u32,
    /// Generation ID
    pub generation_id: u32,
    /// LAN Prune Delay, omitted when `None`
    pub lan_prune_delay: Option<LanPruneDelay>,
}

impl PimHelloBuilder {
    /// Create a new Hello builder
    pub fn new(holdtime_secs: u16, dr_priority: u32, generation_id: u32) -> Self {
        Self {
            holdtime: holdtime_secs,
            dr_priority,
            generation_id,
            lan_prune_delay: None,
        }
    }

    pub fn with_lan_prune_delay(mut self, delay: LanPruneDelay) -> Self {
        self.lan_prune_delay = Some(delay);
        self
    }
}

impl PacketBuilder for PimHelloBuilder {
    fn build(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(32);
        push_header(&mut packet, PIM_HELLO);

        // Holdtime option (type 1)
        packet.extend_from_slice(&PIM_HELLO_HOLDTIME.to_be_bytes());
        packet.extend_from_slice(&2u16.to_be_bytes());
        packet.extend_from_slice(&self.holdtime.to_be_bytes());

        // LAN Prune Delay option (type 2)
        if let Some(delay) = &self.lan_prune_delay {
            packet.extend_from_slice(&PIM_HELLO_LAN_PRUNE_DELAY.to_be_bytes());
            packet.extend_from_slice(&4u16.to_be_bytes());
            packet.extend_from_slice(&delay.encode());
        }

        // DR Priority option (type 19)
        packet.extend_from_slice(&PIM_HELLO_DR_PRIORITY.to_be_bytes());
        packet.extend_from_slice(&4u16.to_be_bytes());
        packet.extend_from_slice(&self.dr_priority.to_be_bytes());

        // Generation ID option (type 20)
        packet.extend_from_slice(&PIM_HELLO_GENERATION_ID.to_be_bytes());
        packet.extend_from_slice(&4u16.to_be_bytes());
        packet.extend_from_slice(&self.generation_id.to_be_bytes());

        let checksum = self.calculate_checksum(&packet);
        finish_checksum(&mut packet, checksum);
        packet
    }
}

/// Source entry of a Join/Prune group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinPruneSource {
    pub address: Ipv4Addr,
    /// WC bit: (*,G) entry, address is the RP
    pub wildcard: bool,
    /// RPT bit: entry applies to the shared tree
    pub rpt: bool,
}

impl JoinPruneSource {
    /// Plain (S,G) source
    pub fn source(address: Ipv4Addr) -> Self {
        Self {
            address,
            wildcard: false,
            rpt: false,
        }
    }

    /// (*,G) entry rooted at `rp`
    pub fn wildcard(rp: Ipv4Addr) -> Self {
        Self {
            address: rp,
            wildcard: true,
            rpt: true,
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = SOURCE_FLAG_SPARSE;
        if self.wildcard {
            flags |= SOURCE_FLAG_WILDCARD;
        }
        if self.rpt {
            flags |= SOURCE_FLAG_RPT;
        }
        flags
    }
}

/// One group record of a Join/Prune message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPruneGroup {
    pub group: Ipv4Addr,
    pub joins: Vec<JoinPruneSource>,
    pub prunes: Vec<JoinPruneSource>,
}

/// Decoded Join/Prune message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPruneMessage {
    /// Router the message is addressed to
    pub upstream: Ipv4Addr,
    /// Holdtime in seconds for the listed join state
    pub holdtime: u16,
    pub groups: Vec<JoinPruneGroup>,
}

fn check_family(data: &[u8]) -> Result<(), PimParseError> {
    if data[0] != ADDR_FAMILY_IPV4 {
        return Err(PimParseError::UnsupportedAddressFamily(data[0]));
    }
    if data[1] != ENCODING_NATIVE {
        return Err(PimParseError::UnsupportedEncoding(data[1]));
    }
    Ok(())
}

fn read_ipv4(data: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(data[0], data[1], data[2], data[3])
}

fn take<'a>(
    body: &'a [u8],
    offset: &mut usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], PimParseError> {
    if *offset + len > body.len() {
        return Err(PimParseError::Truncated(what));
    }
    let slice = &body[*offset..*offset + len];
    *offset += len;
    Ok(slice)
}

impl JoinPruneMessage {
    /// Parse a Join/Prune body (the bytes after the PIM header)
    ///
    /// Unlike Hello options, a truncated Join/Prune is rejected as a whole so
    /// that no partial set of joins is applied.
    pub fn parse(body: &[u8]) -> Result<Self, PimParseError> {
        let mut offset = 0;

        let upstream = take(body, &mut offset, ENCODED_UNICAST_LEN, "upstream neighbor")?;
        check_family(upstream)?;
        let upstream = read_ipv4(&upstream[2..]);

        // Reserved (1) + num_groups (1) + holdtime (2)
        let fixed = take(body, &mut offset, 4, "Join/Prune header")?;
        let num_groups = fixed[1] as usize;
        let holdtime = u16::from_be_bytes([fixed[2], fixed[3]]);

        let mut groups = Vec::with_capacity(num_groups);
        for _ in 0..num_groups {
            // Encoded group: family(1) + encoding(1) + flags(1) + mask_len(1) + group(4)
            let encoded = take(body, &mut offset, ENCODED_GROUP_LEN, "encoded group")?;
            check_family(encoded)?;
            let group = read_ipv4(&encoded[4..]);

            let counts = take(body, &mut offset, 4, "source counts")?;
            let num_joins = u16::from_be_bytes([counts[0], counts[1]]) as usize;
            let num_prunes = u16::from_be_bytes([counts[2], counts[3]]) as usize;

            let mut joins = Vec::with_capacity(num_joins.min(64));
            for _ in 0..num_joins {
                joins.push(Self::parse_source(body, &mut offset)?);
            }
            let mut prunes = Vec::with_capacity(num_prunes.min(64));
            for _ in 0..num_prunes {
                prunes.push(Self::parse_source(body, &mut offset)?);
            }

            groups.push(JoinPruneGroup {
                group,
                joins,
                prunes,
            });
        }

        Ok(Self {
            upstream,
            holdtime,
            groups,
        })
    }

    fn parse_source(body: &[u8], offset: &mut usize) -> Result<JoinPruneSource, PimParseError> {
        // Encoded source: family(1) + encoding(1) + flags(1) + mask_len(1) + source(4)
        let encoded = take(body, offset, ENCODED_SOURCE_LEN, "encoded source")?;
        check_family(encoded)?;
        let flags = encoded[2];
        Ok(JoinPruneSource {
            address: read_ipv4(&encoded[4..]),
            wildcard: flags & SOURCE_FLAG_WILDCARD != 0,
            rpt: flags & SOURCE_FLAG_RPT != 0,
        })
    }
}

/// Builder for PIM Join/Prune packets
#[derive(Debug, Clone)]
pub struct JoinPruneBuilder {
    pub upstream: Ipv4Addr,
    /// Holdtime in seconds
    pub holdtime: u16,
    pub groups: Vec<JoinPruneGroup>,
}

impl JoinPruneBuilder {
    pub fn new(upstream: Ipv4Addr, holdtime_secs: u16) -> Self {
        Self {
            upstream,
            holdtime: holdtime_secs,
            groups: Vec::new(),
        }
    }

    /// Add a single (S,G) join or prune
    pub fn add_source(mut self, source: Ipv4Addr, group: Ipv4Addr, is_join: bool) -> Self {
        let entry = JoinPruneSource::source(source);
        let idx = match self.groups.iter().position(|g| g.group == group) {
            Some(idx) => idx,
            None => {
                self.groups.push(JoinPruneGroup {
                    group,
                    joins: Vec::new(),
                    prunes: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        if is_join {
            self.groups[idx].joins.push(entry);
        } else {
            self.groups[idx].prunes.push(entry);
        }
        self
    }

    /// Add a complete group record
    pub fn add_group(mut self, group: JoinPruneGroup) -> Self {
        self.groups.push(group);
        self
    }

    fn push_source(packet: &mut Vec<u8>, source: &JoinPruneSource) {
        packet.extend_from_slice(&[ADDR_FAMILY_IPV4, ENCODING_NATIVE, source.flags(), 32]);
        packet.extend_from_slice(&source.address.octets());
    }
}

impl PacketBuilder for JoinPruneBuilder {
    fn build(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(64);
        push_header(&mut packet, PIM_JOIN_PRUNE);

        // Encoded-Unicast upstream neighbor
        packet.extend_from_slice(&[ADDR_FAMILY_IPV4, ENCODING_NATIVE]);
        packet.extend_from_slice(&self.upstream.octets());

        packet.push(0); // Reserved
        packet.push(self.groups.len().min(u8::MAX as usize) as u8);
        packet.extend_from_slice(&self.holdtime.to_be_bytes());

        for group in self.groups.iter().take(u8::MAX as usize) {
            // Encoded-Group, /32
            packet.extend_from_slice(&[ADDR_FAMILY_IPV4, ENCODING_NATIVE, 0, 32]);
            packet.extend_from_slice(&group.group.octets());
            packet.extend_from_slice(&(group.joins.len() as u16).to_be_bytes());
            packet.extend_from_slice(&(group.prunes.len() as u16).to_be_bytes());
            for source in &group.joins {
                Self::push_source(&mut packet, source);
            }
            for source in &group.prunes {
                Self::push_source(&mut packet, source);
            }
        }

        let checksum = self.calculate_checksum(&packet);
        finish_checksum(&mut packet, checksum);
        packet
    }
}
