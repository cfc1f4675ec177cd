//! Network transports that feed DMX frames onto the event bus.
//!
//! Two receivers exist, one per protocol:
//! - [`artnet::ArtNetReceiver`]: broadcast UDP on port 6454, all universes
//!   on the wire plus node discovery via ArtPoll/ArtPollReply.
//! - [`sacn::SacnReceiver`]: one multicast group on port 5568 for a single
//!   universe, with per-source priority arbitration.
//!
//! Both run as `tokio-graceful-shutdown` subsystems and publish through
//! [`crate::events::EventBus`].

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod artnet;
pub mod sacn;

pub use artnet::{ArtNetHandle, ArtNetReceiver};
pub use sacn::{SacnHandle, SacnReceiver};

/// Milliseconds since the Unix epoch
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Receive counters, reported over the status channel
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStatistics {
    /// Datagrams that parsed as valid DMX data
    pub packets_received: u64,
    /// Datagrams that failed validation
    pub malformed_packets: u64,
    /// Valid-looking packets dropped before use (bad universe, suppressed source)
    pub dropped_packets: u64,
    /// Timestamp of the most recent valid packet, ms since epoch
    pub last_packet_at: Option<u64>,
}

impl TransportStatistics {
    pub(crate) fn received(&mut self) {
        self.packets_received += 1;
        self.last_packet_at = Some(now_ms());
    }

    pub(crate) fn malformed(&mut self) {
        self.malformed_packets += 1;
    }

    pub(crate) fn dropped(&mut self) {
        self.dropped_packets += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_serialize_camel_case() {
        let mut stats = TransportStatistics::default();
        stats.received();
        stats.malformed();

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["packetsReceived"], 1);
        assert_eq!(json["malformedPackets"], 1);
        assert_eq!(json["droppedPackets"], 0);
        assert!(json["lastPacketAt"].is_u64());
    }
}
