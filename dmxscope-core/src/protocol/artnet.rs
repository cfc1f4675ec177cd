//! Art-Net 4 wire protocol.
//!
//! Art-Net carries DMX512 universes over UDP port 6454. Every packet starts
//! with the ASCII identifier `"Art-Net\0"` followed by a little-endian
//! OpCode. This module covers the three opcodes the system speaks:
//!
//! - `ArtDmx` (0x5000) - channel data for one universe
//! - `ArtPoll` (0x2000) - discovery request, broadcast by a controller
//! - `ArtPollReply` (0x2100) - discovery response describing a node
//!
//! ```text
//! ArtDmx layout:
//!   0..8   "Art-Net\0"
//!   8..10  OpCode 0x5000 (LE)
//!  10..12  protocol revision (BE, >= 14)
//!  12      sequence
//!  13      physical input port
//!  14..16  universe (LE, 0-indexed)
//!  16..18  data length (BE, 2..=512)
//!  18..    channel data
//! ```

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::dmx::{ArtNetNode, DMX_CHANNELS};
use crate::error::ParseError;
use crate::protocol::c_string;

// ============================================================================
// Wire constants
// ============================================================================

/// Identifier that opens every Art-Net packet
pub const ARTNET_HEADER: [u8; 8] = *b"Art-Net\0";

/// UDP port registered for Art-Net
pub const ARTNET_PORT: u16 = 6454;

/// Lowest protocol revision accepted in ArtDmx packets
pub const PROTOCOL_VERSION: u16 = 14;

/// Highest universe number accepted from the wire
pub const UNIVERSE_MAX: u16 = 63999;

/// Fixed part of an ArtDmx packet, channel data follows
pub const DMX_HEADER_LEN: usize = 18;

/// An ArtPoll packet is exactly this long
pub const POLL_LEN: usize = 14;

/// Shortest ArtPollReply that still contains the MAC address field
pub const POLL_REPLY_MIN_LEN: usize = 207;

/// Opcodes at byte offset 8, little-endian
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum OpCode {
    Poll = 0x2000,
    PollReply = 0x2100,
    Dmx = 0x5000,
}

impl OpCode {
    pub fn from_u16(value: u16) -> Option<OpCode> {
        match value {
            0x2000 => Some(OpCode::Poll),
            0x2100 => Some(OpCode::PollReply),
            0x5000 => Some(OpCode::Dmx),
            _ => None,
        }
    }
}

/// Payload of one ArtDmx packet
#[derive(Clone, Debug, PartialEq)]
pub struct DmxData {
    pub sequence: u8,
    /// Physical input port, informational only
    pub physical: u8,
    /// 0-indexed wire value, never remapped
    pub universe: u16,
    /// Channel data, 2..=512 bytes
    pub data: Vec<u8>,
}

// ============================================================================
// Parsing
// ============================================================================

fn check_header(data: &[u8]) -> Result<(), ParseError> {
    if data.len() < ARTNET_HEADER.len() + 2 {
        return Err(ParseError::TooShort {
            expected: ARTNET_HEADER.len() + 2,
            actual: data.len(),
        });
    }
    if data[..ARTNET_HEADER.len()] != ARTNET_HEADER {
        return Err(ParseError::InvalidHeader {
            expected: ARTNET_HEADER.to_vec(),
            actual: data[..ARTNET_HEADER.len()].to_vec(),
        });
    }
    Ok(())
}

/// Validate the identifier and return the packet's opcode.
///
/// This is the dispatch point for inbound datagrams; the per-opcode parsers
/// below re-run the same cheap checks so they are safe to call directly.
pub fn packet_op_code(data: &[u8]) -> Result<OpCode, ParseError> {
    check_header(data)?;
    let op = u16::from_le_bytes([data[8], data[9]]);
    OpCode::from_u16(op).ok_or(ParseError::UnknownPacketType(op))
}

/// Parse an ArtDmx packet.
///
/// The datagram may be longer than `18 + length`; trailing bytes are
/// ignored. A universe above [`UNIVERSE_MAX`] is rejected here so that
/// callers can drop the packet with a warning.
pub fn parse_dmx(data: &[u8]) -> Result<DmxData, ParseError> {
    if data.len() < DMX_HEADER_LEN {
        return Err(ParseError::TooShort {
            expected: DMX_HEADER_LEN,
            actual: data.len(),
        });
    }
    let op = packet_op_code(data)?;
    if op != OpCode::Dmx {
        return Err(ParseError::UnknownPacketType(op as u16));
    }

    let protocol = u16::from_be_bytes([data[10], data[11]]);
    if protocol < PROTOCOL_VERSION {
        return Err(ParseError::UnsupportedVersion(protocol));
    }

    let sequence = data[12];
    let physical = data[13];

    let universe = u16::from_le_bytes([data[14], data[15]]);
    if universe > UNIVERSE_MAX {
        return Err(ParseError::InvalidUniverse(universe));
    }

    let length = u16::from_be_bytes([data[16], data[17]]) as usize;
    if !(2..=DMX_CHANNELS).contains(&length) {
        return Err(ParseError::InvalidPacket(format!(
            "data length {} outside 2..=512",
            length
        )));
    }
    if data.len() < DMX_HEADER_LEN + length {
        return Err(ParseError::LengthMismatch {
            header_len: length,
            actual_len: data.len() - DMX_HEADER_LEN,
        });
    }

    Ok(DmxData {
        sequence,
        physical,
        universe,
        data: data[DMX_HEADER_LEN..DMX_HEADER_LEN + length].to_vec(),
    })
}

/// Parse an ArtPollReply into a node record.
///
/// `source` is the address the reply arrived from and becomes the node's
/// key; `now_ms` stamps `last_seen`. Replies shorter than
/// [`POLL_REPLY_MIN_LEN`] are rejected.
///
/// Field offsets (from the Art-Net 4 node report layout):
/// firmware at 16-17, ESTA manufacturer code at 24-25 (low byte first),
/// short name at 26 (18 bytes), long name at 44 (64 bytes), port count at
/// 173, SwOut at 190-193, MAC at 201-206.
pub fn parse_poll_reply(
    data: &[u8],
    source: Ipv4Addr,
    now_ms: u64,
) -> Result<ArtNetNode, ParseError> {
    if data.len() < POLL_REPLY_MIN_LEN {
        return Err(ParseError::TooShort {
            expected: POLL_REPLY_MIN_LEN,
            actual: data.len(),
        });
    }
    let op = packet_op_code(data)?;
    if op != OpCode::PollReply {
        return Err(ParseError::UnknownPacketType(op as u16));
    }

    // ESTA code arrives low byte first
    let esta = u16::from_le_bytes([data[24], data[25]]);
    let short_name = c_string(&data[26..44]).unwrap_or_default();
    let long_name = c_string(&data[44..108]).unwrap_or_default();
    let firmware_version = format!("V{}.{}", data[16], data[17]);

    // SwOut carries the low byte of each output port's universe; 0xFF marks
    // an unconfigured port.
    let ports = (data[173] as usize).min(4);
    let mut universes = BTreeSet::new();
    for &sw in &data[190..190 + ports] {
        if sw != 0xFF {
            universes.insert(sw);
        }
    }

    let mac_address = data[201..207]
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":");

    Ok(ArtNetNode {
        ip: source,
        short_name,
        long_name,
        universes,
        mac_address,
        manufacturer: manufacturer_name(esta),
        firmware_version,
        last_seen: now_ms,
    })
}

/// Render an ESTA manufacturer code.
///
/// Only codes this system has actually met are named; everything else shows
/// the raw code.
pub fn manufacturer_name(code: u16) -> String {
    match code {
        0x0000 => "ESTA".to_string(),
        0x414C => "Artistic Licence".to_string(),
        0x7FF0..=0x7FFF => format!("Prototype:0x{:04X}", code),
        _ => format!("ESTA:0x{:04X}", code),
    }
}

// ============================================================================
// Construction
// ============================================================================

/// Build an ArtPoll packet.
///
/// TalkToMe and priority are left zero: nodes reply once, directly to us,
/// with no diagnostics stream.
pub fn build_poll() -> [u8; POLL_LEN] {
    let mut pkt = [0u8; POLL_LEN];
    pkt[..8].copy_from_slice(&ARTNET_HEADER);
    pkt[8..10].copy_from_slice(&(OpCode::Poll as u16).to_le_bytes());
    pkt[10] = (PROTOCOL_VERSION >> 8) as u8;
    pkt[11] = (PROTOCOL_VERSION & 0xFF) as u8;
    pkt
}

/// Build an ArtDmx packet for `universe` carrying `channels`.
pub fn build_dmx(universe: u16, sequence: u8, channels: &[u8]) -> Result<Vec<u8>, ParseError> {
    if universe > UNIVERSE_MAX {
        return Err(ParseError::InvalidUniverse(universe));
    }
    if !(2..=DMX_CHANNELS).contains(&channels.len()) {
        return Err(ParseError::InvalidPacket(format!(
            "data length {} outside 2..=512",
            channels.len()
        )));
    }

    let mut pkt = Vec::with_capacity(DMX_HEADER_LEN + channels.len());
    pkt.extend_from_slice(&ARTNET_HEADER);
    pkt.extend_from_slice(&(OpCode::Dmx as u16).to_le_bytes());
    pkt.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    pkt.push(sequence);
    pkt.push(0); // physical
    pkt.extend_from_slice(&universe.to_le_bytes());
    pkt.extend_from_slice(&(channels.len() as u16).to_be_bytes());
    pkt.extend_from_slice(channels);
    Ok(pkt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll_reply_fixture() -> Vec<u8> {
        let mut pkt = vec![0u8; POLL_REPLY_MIN_LEN];
        pkt[..8].copy_from_slice(&ARTNET_HEADER);
        pkt[8..10].copy_from_slice(&(OpCode::PollReply as u16).to_le_bytes());
        pkt[16] = 1; // firmware major
        pkt[17] = 4; // firmware minor
        pkt[24] = 0x4C; // ESTA low byte
        pkt[25] = 0x41; // ESTA high byte
        pkt[26..26 + 7].copy_from_slice(b"Node-1\0");
        pkt[44..44 + 15].copy_from_slice(b"Test Art-Net no");
        pkt[173] = 3;
        pkt[190] = 0;
        pkt[191] = 1;
        pkt[192] = 0xFF; // unconfigured
        pkt[193] = 5; // beyond port count, must be ignored
        pkt[201..207].copy_from_slice(&[0x00, 0x0B, 0x5C, 0xAA, 0x01, 0xFF]);
        pkt
    }

    #[test]
    fn test_poll_round_trip() {
        let pkt = build_poll();
        assert_eq!(pkt.len(), POLL_LEN);
        assert_eq!(&pkt[..8], b"Art-Net\0");
        assert_eq!(packet_op_code(&pkt).unwrap(), OpCode::Poll);
        assert_eq!(pkt[10], 0);
        assert_eq!(pkt[11], 14);
        assert_eq!(pkt[12], 0); // TalkToMe
        assert_eq!(pkt[13], 0); // priority
    }

    #[test]
    fn test_dmx_round_trip() {
        let channels: Vec<u8> = (0..512).map(|i| (i % 256) as u8).collect();
        let pkt = build_dmx(42, 7, &channels).unwrap();
        let dmx = parse_dmx(&pkt).unwrap();
        assert_eq!(dmx.universe, 42);
        assert_eq!(dmx.sequence, 7);
        assert_eq!(dmx.data, channels);
    }

    #[test]
    fn test_dmx_round_trip_short_payload() {
        let pkt = build_dmx(0, 0, &[10, 20]).unwrap();
        assert_eq!(pkt.len(), DMX_HEADER_LEN + 2);
        let dmx = parse_dmx(&pkt).unwrap();
        assert_eq!(dmx.universe, 0);
        assert_eq!(dmx.data, vec![10, 20]);
    }

    #[test]
    fn test_dmx_wire_layout() {
        let pkt = build_dmx(0x1234, 1, &[0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(pkt[8], 0x00); // opcode LE
        assert_eq!(pkt[9], 0x50);
        assert_eq!(pkt[10], 0x00); // protocol BE
        assert_eq!(pkt[11], 14);
        assert_eq!(pkt[14], 0x34); // universe LE
        assert_eq!(pkt[15], 0x12);
        assert_eq!(pkt[16], 0x00); // length BE
        assert_eq!(pkt[17], 3);
    }

    #[test]
    fn test_rejects_bad_header() {
        let mut pkt = build_dmx(1, 0, &[1, 2]).unwrap();
        pkt[0] = b'B';
        assert!(matches!(
            parse_dmx(&pkt),
            Err(ParseError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_rejects_truncated() {
        assert!(matches!(
            parse_dmx(&[0u8; 4]),
            Err(ParseError::TooShort { .. })
        ));
        let pkt = build_dmx(1, 0, &[1, 2, 3, 4]).unwrap();
        assert!(matches!(
            parse_dmx(&pkt[..17]),
            Err(ParseError::TooShort { .. })
        ));
        // header claims more data than the datagram carries
        assert!(matches!(
            parse_dmx(&pkt[..DMX_HEADER_LEN + 2]),
            Err(ParseError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_old_protocol_revision() {
        let mut pkt = build_dmx(1, 0, &[1, 2]).unwrap();
        pkt[11] = 13;
        assert_eq!(parse_dmx(&pkt), Err(ParseError::UnsupportedVersion(13)));
    }

    #[test]
    fn test_rejects_universe_out_of_range() {
        assert!(matches!(
            build_dmx(64000, 0, &[1, 2]),
            Err(ParseError::InvalidUniverse(64000))
        ));
        let mut pkt = build_dmx(0, 0, &[1, 2]).unwrap();
        pkt[14..16].copy_from_slice(&64000u16.to_le_bytes());
        assert_eq!(parse_dmx(&pkt), Err(ParseError::InvalidUniverse(64000)));
    }

    #[test]
    fn test_rejects_bad_length_field() {
        let mut pkt = build_dmx(1, 0, &[1, 2]).unwrap();
        pkt[16..18].copy_from_slice(&1u16.to_be_bytes());
        assert!(matches!(parse_dmx(&pkt), Err(ParseError::InvalidPacket(_))));
        pkt[16..18].copy_from_slice(&513u16.to_be_bytes());
        assert!(matches!(parse_dmx(&pkt), Err(ParseError::InvalidPacket(_))));
    }

    #[test]
    fn test_unknown_opcode() {
        let mut pkt = build_poll().to_vec();
        pkt[8..10].copy_from_slice(&0x9999u16.to_le_bytes());
        assert_eq!(
            packet_op_code(&pkt),
            Err(ParseError::UnknownPacketType(0x9999))
        );
    }

    #[test]
    fn test_poll_reply_parse() {
        let source = Ipv4Addr::new(10, 0, 0, 99);
        let node = parse_poll_reply(&poll_reply_fixture(), source, 1234).unwrap();
        assert_eq!(node.ip, source);
        assert_eq!(node.short_name, "Node-1");
        assert_eq!(node.long_name, "Test Art-Net no");
        assert_eq!(node.firmware_version, "V1.4");
        assert_eq!(node.manufacturer, "Artistic Licence");
        assert_eq!(node.mac_address, "00:0B:5C:AA:01:FF");
        assert_eq!(node.last_seen, 1234);
        // three ports considered, 0xFF excluded, fourth SwOut ignored
        assert_eq!(node.universes.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_poll_reply_too_short() {
        let pkt = poll_reply_fixture();
        assert!(matches!(
            parse_poll_reply(&pkt[..206], Ipv4Addr::UNSPECIFIED, 0),
            Err(ParseError::TooShort { .. })
        ));
    }

    #[test]
    fn test_esta_code_byte_order() {
        // value is (high << 8) | low with the low byte stored first
        let mut pkt = poll_reply_fixture();
        pkt[24] = 0x34;
        pkt[25] = 0x12;
        let node = parse_poll_reply(&pkt, Ipv4Addr::UNSPECIFIED, 0).unwrap();
        assert_eq!(node.manufacturer, "ESTA:0x1234");
    }
}
