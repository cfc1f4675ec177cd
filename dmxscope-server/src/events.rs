//! Broadcast fan-out between the receiver tasks and whoever is watching.
//!
//! The transports publish here; the monitor loop, the recorder and the
//! status reporters subscribe. Channels are `tokio::sync::broadcast` so a
//! slow consumer lags on its own receiver instead of stalling the socket
//! loop.

use tokio::sync::broadcast;

use dmxscope_core::{ArtNetNode, DmxPacket, SacnSourceInfo};

use crate::recording::player::PlaybackEvent;

const CHANNEL_CAPACITY: usize = 32;

#[derive(Clone, Debug)]
pub struct EventBus {
    dmx_tx: broadcast::Sender<DmxPacket>,
    universe_tx: broadcast::Sender<u16>,
    node_tx: broadcast::Sender<ArtNetNode>,
    sources_tx: broadcast::Sender<Vec<SacnSourceInfo>>,
    playback_tx: broadcast::Sender<PlaybackEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (dmx_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (universe_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (node_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (sources_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (playback_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventBus {
            dmx_tx,
            universe_tx,
            node_tx,
            sources_tx,
            playback_tx,
        }
    }

    /// One frame of levels for a universe, from a live transport or the player
    pub fn publish_dmx(&self, packet: DmxPacket) {
        match self.dmx_tx.send(packet) {
            Err(_) => {
                log::trace!("Dropping DMX frame, no subscribers");
            }
            Ok(count) => {
                log::trace!("DMX frame sent to {} receivers", count);
            }
        }
    }

    /// A universe was seen for the first time this run
    pub fn publish_universe(&self, universe: u16) {
        let _ = self.universe_tx.send(universe);
    }

    /// A new Art-Net node appeared
    pub fn publish_node(&self, node: ArtNetNode) {
        let _ = self.node_tx.send(node);
    }

    /// The sACN source table changed (new source, timeout, active flip)
    pub fn publish_sources(&self, sources: Vec<SacnSourceInfo>) {
        let _ = self.sources_tx.send(sources);
    }

    pub fn publish_playback(&self, event: PlaybackEvent) {
        let _ = self.playback_tx.send(event);
    }

    pub fn subscribe_dmx(&self) -> broadcast::Receiver<DmxPacket> {
        self.dmx_tx.subscribe()
    }

    pub fn subscribe_universes(&self) -> broadcast::Receiver<u16> {
        self.universe_tx.subscribe()
    }

    pub fn subscribe_nodes(&self) -> broadcast::Receiver<ArtNetNode> {
        self.node_tx.subscribe()
    }

    pub fn subscribe_sources(&self) -> broadcast::Receiver<Vec<SacnSourceInfo>> {
        self.sources_tx.subscribe()
    }

    pub fn subscribe_playback(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.playback_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dmx_fanout() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe_dmx();
        let mut rx_b = bus.subscribe_dmx();

        let mut packet = DmxPacket::blank(7);
        packet.channels[0] = 255;
        bus.publish_dmx(packet.clone());

        assert_eq!(rx_a.recv().await.unwrap(), packet);
        assert_eq!(rx_b.recv().await.unwrap(), packet);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish_universe(3);
        bus.publish_dmx(DmxPacket::blank(3));
    }
}
