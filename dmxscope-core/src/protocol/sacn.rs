//! ANSI E1.31 (streaming ACN, "sACN") wire protocol.
//!
//! sACN carries DMX512 universes over UDP port 5568, usually to the
//! per-universe multicast group `239.255.hi.lo`. A data packet stacks three
//! layers: the ACN root layer (preamble + packet identifier + CID), the
//! E1.31 framing layer (source name, priority, sequence, universe) and the
//! DMP layer (START code + channel data).
//!
//! Channel levels cross the merge boundary as percentages; the conversions
//! in [`slot_to_percent`] and [`percent_to_dmx`] round-trip exactly for
//! every 8-bit value.

use std::net::Ipv4Addr;

use crate::dmx::DMX_CHANNELS;
use crate::error::ParseError;
use crate::protocol::c_string;

// ============================================================================
// Wire constants
// ============================================================================

/// UDP port registered for sACN
pub const E131_PORT: u16 = 5568;

/// ACN packet identifier at offset 4
pub const ACN_IDENTIFIER: [u8; 12] = *b"ASC-E1.17\0\0\0";

/// RLP preamble size, big-endian at offset 0
const PREAMBLE_SIZE: u16 = 0x0010;

/// Root layer vector for E1.31 data packets
const VECTOR_ROOT_DATA: u32 = 0x0000_0004;

/// Framing layer vector for DMX data
const VECTOR_FRAMING_DATA: u32 = 0x0000_0002;

/// DMP layer vector (set property)
const VECTOR_DMP_SET_PROPERTY: u8 = 0x02;

/// DMP address and data type: one byte per property, relative addressing
const DMP_ADDRESS_DATA_TYPE: u8 = 0xA1;

/// Options bit: the source is terminating this stream
const OPTION_STREAM_TERMINATED: u8 = 0x40;

/// Highest sACN priority
pub const PRIORITY_MAX: u8 = 200;

/// Default priority when a sender does not specify one
pub const PRIORITY_DEFAULT: u8 = 100;

/// Universes are 1-indexed on the wire
pub const UNIVERSE_MIN: u16 = 1;
pub const UNIVERSE_MAX: u16 = 63999;

/// Offset of the first data slot, right after the START code at 125
const DATA_OFFSET: usize = 126;

/// A data packet with zero slots still runs through the START code
const MIN_LEN: usize = DATA_OFFSET;

/// One decoded E1.31 data packet
#[derive(Clone, Debug, PartialEq)]
pub struct SacnPacket {
    /// Sender CID, the globally unique 128-bit source identity
    pub cid: [u8; 16],
    pub source_name: String,
    /// 0-200, higher wins during merging
    pub priority: u8,
    pub sequence: u8,
    /// Stream-terminated flag from the options field
    pub terminated: bool,
    /// 1-indexed wire value, never remapped
    pub universe: u16,
    /// Raw data slots without the START code, at most 512
    pub slots: Vec<u8>,
}

impl SacnPacket {
    /// CID formatted as 32 lowercase hex digits
    pub fn cid_hex(&self) -> String {
        self.cid.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse an E1.31 data packet.
///
/// Anything that is not a well-formed data packet with a zero START code is
/// rejected; alternate START codes carry non-dimmer data this system does
/// not interpret.
pub fn parse_data_packet(data: &[u8]) -> Result<SacnPacket, ParseError> {
    if data.len() < MIN_LEN {
        return Err(ParseError::TooShort {
            expected: MIN_LEN,
            actual: data.len(),
        });
    }

    let preamble = u16::from_be_bytes([data[0], data[1]]);
    if preamble != PREAMBLE_SIZE {
        return Err(ParseError::InvalidPacket(format!(
            "RLP preamble size {:#06X}",
            preamble
        )));
    }
    let postamble = u16::from_be_bytes([data[2], data[3]]);
    if postamble != 0 {
        return Err(ParseError::InvalidPacket(format!(
            "RLP postamble size {:#06X}",
            postamble
        )));
    }
    if data[4..16] != ACN_IDENTIFIER {
        return Err(ParseError::InvalidHeader {
            expected: ACN_IDENTIFIER.to_vec(),
            actual: data[4..16].to_vec(),
        });
    }

    let root_vector = u32::from_be_bytes([data[18], data[19], data[20], data[21]]);
    if root_vector != VECTOR_ROOT_DATA {
        return Err(ParseError::UnknownPacketType((root_vector & 0xFFFF) as u16));
    }
    let mut cid = [0u8; 16];
    cid.copy_from_slice(&data[22..38]);

    let framing_vector = u32::from_be_bytes([data[40], data[41], data[42], data[43]]);
    if framing_vector != VECTOR_FRAMING_DATA {
        return Err(ParseError::UnknownPacketType((framing_vector & 0xFFFF) as u16));
    }

    let source_name = c_string(&data[44..108]).unwrap_or_default();
    let priority = data[108];
    if priority > PRIORITY_MAX {
        return Err(ParseError::InvalidPacket(format!(
            "priority {} above {}",
            priority, PRIORITY_MAX
        )));
    }
    let sequence = data[111];
    let options = data[112];
    let universe = u16::from_be_bytes([data[113], data[114]]);
    if !(UNIVERSE_MIN..=UNIVERSE_MAX).contains(&universe) {
        return Err(ParseError::InvalidUniverse(universe));
    }

    if data[117] != VECTOR_DMP_SET_PROPERTY {
        return Err(ParseError::UnknownPacketType(data[117] as u16));
    }
    if data[118] != DMP_ADDRESS_DATA_TYPE {
        return Err(ParseError::InvalidPacket(format!(
            "DMP address type {:#04X}",
            data[118]
        )));
    }

    // property count includes the START code slot
    let property_count = u16::from_be_bytes([data[123], data[124]]) as usize;
    if property_count == 0 {
        return Err(ParseError::InvalidPacket("empty DMP property list".into()));
    }
    let slot_count = property_count - 1;
    if slot_count > DMX_CHANNELS {
        return Err(ParseError::InvalidPacket(format!(
            "{} data slots exceed 512",
            slot_count
        )));
    }
    if data.len() < DATA_OFFSET + slot_count {
        return Err(ParseError::LengthMismatch {
            header_len: slot_count,
            actual_len: data.len() - DATA_OFFSET,
        });
    }

    let start_code = data[125];
    if start_code != 0 {
        return Err(ParseError::InvalidPacket(format!(
            "non-zero START code {:#04X}",
            start_code
        )));
    }

    Ok(SacnPacket {
        cid,
        source_name,
        priority,
        sequence,
        terminated: options & OPTION_STREAM_TERMINATED != 0,
        universe,
        slots: data[DATA_OFFSET..DATA_OFFSET + slot_count].to_vec(),
    })
}

// ============================================================================
// Construction
// ============================================================================

/// Build an E1.31 data packet.
pub fn build_data_packet(
    cid: &[u8; 16],
    source_name: &str,
    universe: u16,
    priority: u8,
    sequence: u8,
    slots: &[u8],
) -> Result<Vec<u8>, ParseError> {
    if !(UNIVERSE_MIN..=UNIVERSE_MAX).contains(&universe) {
        return Err(ParseError::InvalidUniverse(universe));
    }
    if priority > PRIORITY_MAX {
        return Err(ParseError::InvalidPacket(format!(
            "priority {} above {}",
            priority, PRIORITY_MAX
        )));
    }
    if slots.len() > DMX_CHANNELS {
        return Err(ParseError::InvalidPacket(format!(
            "{} data slots exceed 512",
            slots.len()
        )));
    }

    let total = DATA_OFFSET + slots.len();
    let mut pkt = vec![0u8; total];

    // root layer
    pkt[0..2].copy_from_slice(&PREAMBLE_SIZE.to_be_bytes());
    pkt[4..16].copy_from_slice(&ACN_IDENTIFIER);
    pkt[16..18].copy_from_slice(&flags_and_length(total - 16).to_be_bytes());
    pkt[18..22].copy_from_slice(&VECTOR_ROOT_DATA.to_be_bytes());
    pkt[22..38].copy_from_slice(cid);

    // framing layer
    pkt[38..40].copy_from_slice(&flags_and_length(total - 38).to_be_bytes());
    pkt[40..44].copy_from_slice(&VECTOR_FRAMING_DATA.to_be_bytes());
    let name = source_name.as_bytes();
    let name_len = name.len().min(63);
    pkt[44..44 + name_len].copy_from_slice(&name[..name_len]);
    pkt[108] = priority;
    pkt[111] = sequence;
    pkt[113..115].copy_from_slice(&universe.to_be_bytes());

    // DMP layer
    pkt[115..117].copy_from_slice(&flags_and_length(total - 115).to_be_bytes());
    pkt[117] = VECTOR_DMP_SET_PROPERTY;
    pkt[118] = DMP_ADDRESS_DATA_TYPE;
    pkt[121..123].copy_from_slice(&1u16.to_be_bytes()); // address increment
    pkt[123..125].copy_from_slice(&((slots.len() + 1) as u16).to_be_bytes());
    pkt[125] = 0; // START code
    pkt[DATA_OFFSET..].copy_from_slice(slots);

    Ok(pkt)
}

/// ACN flags (0x7) in the top nibble, PDU length below
fn flags_and_length(length: usize) -> u16 {
    0x7000 | (length as u16 & 0x0FFF)
}

// ============================================================================
// Helpers
// ============================================================================

/// The multicast group a universe's data is sent to: `239.255.hi.lo`
pub fn multicast_addr(universe: u16) -> Ipv4Addr {
    let [hi, lo] = universe.to_be_bytes();
    Ipv4Addr::new(239, 255, hi, lo)
}

/// Convert a raw DMX slot value to a percentage level
pub fn slot_to_percent(raw: u8) -> f32 {
    raw as f32 * 100.0 / 255.0
}

/// Convert a percentage level back to a DMX value, rounding to nearest
pub fn percent_to_dmx(percent: f32) -> u8 {
    (percent / 100.0 * 255.0).round().clamp(0.0, 255.0) as u8
}
