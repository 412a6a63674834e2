// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Protocol message codecs
//!
//! Only PIM-SM (RFC 7761) is implemented, and only the message types a link
//! engine needs: Hello and Join/Prune. The codec works on the PIM message
//! itself (common header onwards); link-layer and IP encapsulation live in
//! `crate::pim::frame`.
//!
//! | Packet Type | IP protocol | Destination |
//! |-------------|-------------|-------------|
//! | PIM Hello | 103 | 224.0.0.13 |
//! | PIM Join/Prune | 103 | 224.0.0.13 |

pub mod pim;

/// Compute the Internet checksum (RFC 1071) over `data`
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for i in (0..data.len()).step_by(2) {
        if i + 1 < data.len() {
            let word = u16::from_be_bytes([data[i], data[i + 1]]);
            sum = sum.wrapping_add(word as u32);
        } else {
            sum = sum.wrapping_add((data[i] as u32) << 8);
        }
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Common trait for protocol packet builders
pub trait PacketBuilder {
    /// Build a packet for transmission
    fn build(&self) -> Vec<u8>;

    /// Calculate checksum for the packet
    fn calculate_checksum(&self, data: &[u8]) -> u16 {
        internet_checksum(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_rfc1071_example() {
        // RFC 1071 section 3 example words
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn test_checksum_odd_length() {
        assert_eq!(internet_checksum(&[0xff]), !0xff00);
    }

    #[test]
    fn test_checksum_verifies_to_zero() {
        let mut data = vec![0x20, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00, 0x69];
        let csum = internet_checksum(&data);
        data[2..4].copy_from_slice(&csum.to_be_bytes());
        assert_eq!(internet_checksum(&data), 0);
    }
}
