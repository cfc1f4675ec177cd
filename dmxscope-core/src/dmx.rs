//! Shared data model for decoded DMX traffic.
//!
//! These are the records exchanged between the protocol layer, the merge
//! logic and the server: one decoded channel update ([`DmxPacket`]) plus the
//! discovery tables the transports maintain ([`UniverseInfo`],
//! [`ArtNetNode`], [`SacnSourceInfo`]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;

/// Number of channels in one DMX512 universe
pub const DMX_CHANNELS: usize = 512;

/// Transport protocol a universe is carried on.
///
/// Universe identity is protocol-scoped: Art-Net universes are 0-indexed on
/// the wire and sACN universes are 1-indexed, and the two numbering schemes
/// are never normalized against each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Sacn,
    Artnet,
}

impl Protocol {
    /// Stable byte value used in the recording file header
    pub fn to_byte(self) -> u8 {
        match self {
            Protocol::Sacn => 0,
            Protocol::Artnet => 1,
        }
    }

    pub fn from_byte(value: u8) -> Option<Protocol> {
        match value {
            0 => Some(Protocol::Sacn),
            1 => Some(Protocol::Artnet),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Sacn => write!(f, "sacn"),
            Protocol::Artnet => write!(f, "artnet"),
        }
    }
}

/// One decoded update for a universe.
///
/// Produced per incoming datagram and consumed immediately; nothing keeps
/// these around (the recorder persists only the channel array). The channel
/// array is always fully populated: channels beyond the wire frame's data
/// length carry the value from the previous update, not zero, except before
/// the first update for the universe.
#[derive(Clone, Debug, PartialEq)]
pub struct DmxPacket {
    pub universe: u16,
    pub channels: [u8; DMX_CHANNELS],
    /// Sender label: source name for sACN, source address for Art-Net
    pub source: Option<String>,
    /// sACN priority (0-200), absent for Art-Net
    pub priority: Option<u8>,
    pub sequence: Option<u8>,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl DmxPacket {
    /// Packet with all channels at zero, the state before any data arrives
    pub fn blank(universe: u16) -> Self {
        DmxPacket {
            universe,
            channels: [0; DMX_CHANNELS],
            source: None,
            priority: None,
            sequence: None,
            timestamp: 0,
        }
    }
}

/// Discovery record for one universe number observed on a transport.
///
/// Created on first sighting, updated on every subsequent packet, never
/// removed except by an explicit clear.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniverseInfo {
    pub universe: u16,
    /// Unix ms of the most recent packet
    pub last_seen: u64,
    pub packet_count: u64,
    /// Label of the most recent sender
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl UniverseInfo {
    pub fn new(universe: u16, now_ms: u64, source: Option<String>) -> Self {
        UniverseInfo {
            universe,
            last_seen: now_ms,
            packet_count: 1,
            source,
        }
    }

    /// Record one more packet for this universe
    pub fn update(&mut self, now_ms: u64, source: Option<String>) {
        self.last_seen = now_ms;
        self.packet_count += 1;
        if source.is_some() {
            self.source = source;
        }
    }
}

/// A discovered Art-Net device, keyed by its IP address.
///
/// Created on the first ArtPollReply from an address and updated in place
/// afterwards. Nodes are never expired automatically; discovery is a
/// bounded, explicit operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtNetNode {
    pub ip: Ipv4Addr,
    pub short_name: String,
    pub long_name: String,
    /// Configured output universes (SwOut low bytes), 0-indexed
    pub universes: BTreeSet<u8>,
    /// Colon-separated uppercase hex, e.g. `00:0B:5C:01:02:03`
    pub mac_address: String,
    pub manufacturer: String,
    /// Formatted `V{major}.{minor}`
    pub firmware_version: String,
    /// Unix ms of the most recent reply
    pub last_seen: u64,
}

impl fmt::Display for ArtNetNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.short_name, self.ip)
    }
}

/// One tracked sACN transmitter on a universe.
///
/// The key is a composite identity: the CID as hex if the decoder provided
/// one, else `name@address`, else the bare source name. CID is preferred
/// because it is the only globally unique sender identity sACN guarantees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SacnSourceInfo {
    pub key: String,
    pub name: String,
    /// sACN priority, 0-200, higher wins
    pub priority: u8,
    /// Unix ms of the most recent packet
    pub last_seen: u64,
    /// Exactly one source (or none) is active at any time
    pub is_active: bool,
}

impl fmt::Display for SacnSourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (priority {}{})",
            self.name,
            self.priority,
            if self.is_active { ", active" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_byte_round_trip() {
        assert_eq!(Protocol::from_byte(Protocol::Sacn.to_byte()), Some(Protocol::Sacn));
        assert_eq!(Protocol::from_byte(Protocol::Artnet.to_byte()), Some(Protocol::Artnet));
        assert_eq!(Protocol::from_byte(2), None);
    }

    #[test]
    fn test_universe_info_update() {
        let mut info = UniverseInfo::new(7, 1000, Some("10.0.0.5:6454".to_string()));
        assert_eq!(info.packet_count, 1);
        info.update(2500, None);
        assert_eq!(info.packet_count, 2);
        assert_eq!(info.last_seen, 2500);
        // source sticks when the update carries none
        assert_eq!(info.source.as_deref(), Some("10.0.0.5:6454"));
    }

    #[test]
    fn test_serialization_uses_camel_case() {
        let info = UniverseInfo::new(1, 42, None);
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"lastSeen\":42"));
        assert!(json.contains("\"packetCount\":1"));
        assert!(!json.contains("\"source\""));
    }
}
