//! sACN (E1.31) receiver for a single universe.
//!
//! Joins the universe's multicast group and runs every data packet through
//! the priority arbitration in [`dmxscope_core::merge`]: exactly one source
//! is authoritative at a time, packets from the others are suppressed. A
//! periodic sweep expires sources that stopped transmitting without sending
//! a stream-terminated packet.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_graceful_shutdown::SubsystemHandle;

use dmxscope_core::merge::{SOURCE_TIMEOUT_MS, SWEEP_PERIOD_MS};
use dmxscope_core::protocol::sacn::{self, E131_PORT, UNIVERSE_MAX, UNIVERSE_MIN};
use dmxscope_core::{
    DmxPacket, ParseError, SacnSourceInfo, SourceFrame, SourceRegistry, UniverseInfo, DMX_CHANNELS,
};

use crate::error::DmxError;
use crate::events::EventBus;
use crate::network::{create_udp_multicast_listen, interface_exists};
use crate::transport::{now_ms, TransportStatistics};

/// E1.31 data packets top out at 638 bytes
const RECV_BUFFER_SIZE: usize = 1024;

const COMMAND_QUEUE_DEPTH: usize = 16;

pub enum SacnCommand {
    Sources {
        reply: oneshot::Sender<Vec<SacnSourceInfo>>,
    },
    Universe {
        reply: oneshot::Sender<Option<UniverseInfo>>,
    },
    Statistics {
        reply: oneshot::Sender<TransportStatistics>,
    },
}

/// Cloneable front for a running [`SacnReceiver`]
#[derive(Clone, Debug)]
pub struct SacnHandle {
    command_tx: mpsc::Sender<SacnCommand>,
}

impl SacnHandle {
    /// Current source table, sorted by priority descending
    pub async fn sources(&self) -> Result<Vec<SacnSourceInfo>, DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(SacnCommand::Sources { reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)
    }

    pub async fn universe(&self) -> Result<Option<UniverseInfo>, DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(SacnCommand::Universe { reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)
    }

    pub async fn statistics(&self) -> Result<TransportStatistics, DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(SacnCommand::Statistics { reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)
    }
}

#[derive(Debug)]
pub struct SacnReceiver {
    universe: u16,
    group: SocketAddrV4,
    interface: Ipv4Addr,
    bus: EventBus,
    sock: Option<UdpSocket>,
    command_rx: mpsc::Receiver<SacnCommand>,
    registry: SourceRegistry,
    /// Channel state from the active source only
    channels: [u8; DMX_CHANNELS],
    universe_info: Option<UniverseInfo>,
    statistics: TransportStatistics,
    commands_closed: bool,
}

impl SacnReceiver {
    pub fn new(
        universe: u16,
        interface: Ipv4Addr,
        bus: EventBus,
    ) -> Result<(SacnReceiver, SacnHandle), DmxError> {
        if !(UNIVERSE_MIN..=UNIVERSE_MAX).contains(&universe) {
            return Err(DmxError::InvalidUniverse {
                universe,
                min: UNIVERSE_MIN,
                max: UNIVERSE_MAX,
            });
        }
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let receiver = SacnReceiver {
            universe,
            group: SocketAddrV4::new(sacn::multicast_addr(universe), E131_PORT),
            interface,
            bus,
            sock: None,
            command_rx,
            registry: SourceRegistry::with_timeout(SOURCE_TIMEOUT_MS),
            channels: [0; DMX_CHANNELS],
            universe_info: None,
            statistics: TransportStatistics::default(),
            commands_closed: false,
        };
        Ok((receiver, SacnHandle { command_tx }))
    }

    fn start_socket(&mut self) -> Result<(), DmxError> {
        if !interface_exists(&self.interface) {
            return Err(DmxError::InterfaceNotFound(self.interface));
        }
        let sock = create_udp_multicast_listen(&self.group, &self.interface)?;
        log::debug!(
            "{} via {}: listening for universe {} data",
            self.group,
            self.interface,
            self.universe
        );
        self.sock = Some(sock);
        Ok(())
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), DmxError> {
        self.start_socket()?;
        loop {
            if self.sock.is_some() {
                match self.socket_loop(&subsys).await {
                    Err(DmxError::Shutdown) => {
                        return Ok(());
                    }
                    r => {
                        log::warn!("{}: socket loop ended: {:?}, reopening", self.group, r);
                    }
                }
                self.sock = None;
            } else {
                sleep(Duration::from_millis(1000)).await;
                self.start_socket()?;
            }
        }
    }

    async fn socket_loop(&mut self, subsys: &SubsystemHandle) -> Result<(), DmxError> {
        let mut buf = Vec::with_capacity(RECV_BUFFER_SIZE);
        let mut sweep = tokio::time::interval(Duration::from_millis(SWEEP_PERIOD_MS));
        log::trace!("{}: starting socket loop", self.group);

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    return Err(DmxError::Shutdown);
                },
                r = self.command_rx.recv(), if !self.commands_closed => {
                    match r {
                        Some(command) => {
                            self.handle_command(command);
                        }
                        None => {
                            // All handles dropped; keep receiving, packets
                            // still go out on the bus
                            log::debug!("{}: command channel closed", self.group);
                            self.commands_closed = true;
                        }
                    }
                },
                _ = sweep.tick() => {
                    if self.registry.sweep(now_ms()) {
                        log::info!(
                            "Universe {}: source table changed after timeout sweep",
                            self.universe
                        );
                        self.bus.publish_sources(self.registry.sources());
                    }
                },
                r = self.sock.as_ref().unwrap().recv_buf_from(&mut buf) => {
                    match r {
                        Ok((_, peer)) => {
                            self.process_datagram(&buf, peer);
                        },
                        Err(e) => {
                            return Err(DmxError::Io(e));
                        }
                    }
                },
            }
            buf.clear();
        }
    }

    fn handle_command(&mut self, command: SacnCommand) {
        match command {
            SacnCommand::Sources { reply } => {
                let _ = reply.send(self.registry.sources());
            }
            SacnCommand::Universe { reply } => {
                let _ = reply.send(self.universe_info.clone());
            }
            SacnCommand::Statistics { reply } => {
                let _ = reply.send(self.statistics.clone());
            }
        }
    }

    fn process_datagram(&mut self, data: &[u8], peer: SocketAddr) {
        let packet = match sacn::parse_data_packet(data) {
            Ok(packet) => packet,
            Err(e @ ParseError::InvalidUniverse(_)) => {
                log::warn!("{}: dropping sACN data: {}", peer, e);
                self.statistics.dropped();
                return;
            }
            Err(e) => {
                log::debug!("{}: malformed sACN packet: {}", peer, e);
                self.statistics.malformed();
                return;
            }
        };
        if packet.universe != self.universe {
            // Stray traffic from another group; the header field decides
            log::trace!(
                "{}: universe {} packet on the universe {} group",
                peer,
                packet.universe,
                self.universe
            );
            self.statistics.dropped();
            return;
        }
        self.statistics.received();
        let now = now_ms();
        let peer_v4 = match peer {
            SocketAddr::V4(addr) => Some(addr),
            SocketAddr::V6(_) => None,
        };

        match &mut self.universe_info {
            Some(info) => info.update(now, Some(packet.source_name.clone())),
            None => {
                log::info!(
                    "First data for universe {} from '{}'",
                    self.universe,
                    packet.source_name
                );
                self.universe_info = Some(UniverseInfo::new(
                    self.universe,
                    now,
                    Some(packet.source_name.clone()),
                ));
                self.bus.publish_universe(self.universe);
            }
        }

        if packet.terminated {
            let key = SourceRegistry::source_key(&packet.source_name, Some(&packet.cid), peer_v4);
            if self.registry.remove(&key) {
                log::info!("Source '{}' terminated its stream", packet.source_name);
                self.bus.publish_sources(self.registry.sources());
            }
            return;
        }

        let levels: Vec<f32> = packet
            .slots
            .iter()
            .map(|&v| sacn::slot_to_percent(v))
            .collect();
        let outcome = self.registry.ingest(
            &SourceFrame {
                universe: packet.universe,
                levels: &levels,
                name: &packet.source_name,
                cid: Some(&packet.cid),
                address: peer_v4,
                priority: packet.priority,
                sequence: Some(packet.sequence),
            },
            now,
        );

        if outcome.sources_changed {
            self.bus.publish_sources(self.registry.sources());
        }
        match outcome.emit {
            Some(values) => {
                self.channels[..values.len()].copy_from_slice(&values);
                self.bus.publish_dmx(DmxPacket {
                    universe: self.universe,
                    channels: self.channels,
                    source: Some(packet.source_name.clone()),
                    priority: Some(packet.priority),
                    sequence: Some(packet.sequence),
                    timestamp: now,
                });
            }
            None => {
                log::trace!(
                    "Suppressed packet from non-active source '{}'",
                    packet.source_name
                );
                self.statistics.dropped();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CID_A: [u8; 16] = [0xAA; 16];
    const CID_B: [u8; 16] = [0xBB; 16];

    fn make_receiver(universe: u16) -> (SacnReceiver, SacnHandle) {
        SacnReceiver::new(universe, Ipv4Addr::UNSPECIFIED, EventBus::new()).unwrap()
    }

    fn datagram(cid: &[u8; 16], name: &str, universe: u16, priority: u8, slots: &[u8]) -> Vec<u8> {
        sacn::build_data_packet(cid, name, universe, priority, 1, slots).unwrap()
    }

    #[test]
    fn test_rejects_universe_zero() {
        let err = SacnReceiver::new(0, Ipv4Addr::UNSPECIFIED, EventBus::new()).unwrap_err();
        assert!(matches!(err, DmxError::InvalidUniverse { universe: 0, .. }));
    }

    #[tokio::test]
    async fn test_active_source_data_is_emitted() {
        let (mut receiver, _handle) = make_receiver(1);
        let mut rx = receiver.bus.subscribe_dmx();
        let peer: SocketAddr = "10.0.0.5:5568".parse().unwrap();

        receiver.process_datagram(&datagram(&CID_A, "desk", 1, 100, &[200, 0, 50]), peer);

        let packet = rx.recv().await.unwrap();
        assert_eq!(packet.universe, 1);
        assert_eq!(packet.channels[0], 200);
        assert_eq!(packet.channels[2], 50);
        assert_eq!(packet.source.as_deref(), Some("desk"));
        assert_eq!(packet.priority, Some(100));
    }

    #[tokio::test]
    async fn test_lower_priority_source_is_suppressed() {
        let (mut receiver, _handle) = make_receiver(1);
        let peer_a: SocketAddr = "10.0.0.5:5568".parse().unwrap();
        let peer_b: SocketAddr = "10.0.0.6:5568".parse().unwrap();

        receiver.process_datagram(&datagram(&CID_A, "desk", 1, 150, &[10]), peer_a);
        receiver.process_datagram(&datagram(&CID_B, "backup", 1, 100, &[99]), peer_b);

        // The backup source is tracked but its data never lands
        assert_eq!(receiver.registry.len(), 2);
        assert_eq!(receiver.channels[0], 10);
        assert_eq!(receiver.statistics.dropped_packets, 1);
    }

    #[tokio::test]
    async fn test_wrong_universe_in_header_is_dropped() {
        let (mut receiver, _handle) = make_receiver(1);
        let peer: SocketAddr = "10.0.0.5:5568".parse().unwrap();

        receiver.process_datagram(&datagram(&CID_A, "desk", 2, 100, &[10]), peer);

        assert_eq!(receiver.statistics.dropped_packets, 1);
        assert_eq!(receiver.statistics.packets_received, 0);
        assert!(receiver.registry.is_empty());
    }

    #[tokio::test]
    async fn test_terminated_stream_removes_source() {
        let (mut receiver, _handle) = make_receiver(1);
        let peer: SocketAddr = "10.0.0.5:5568".parse().unwrap();

        receiver.process_datagram(&datagram(&CID_A, "desk", 1, 100, &[10]), peer);
        assert_eq!(receiver.registry.len(), 1);

        let mut terminated = datagram(&CID_A, "desk", 1, 100, &[10]);
        terminated[112] |= 0x40; // stream-terminated option bit
        receiver.process_datagram(&terminated, peer);

        assert!(receiver.registry.is_empty());
    }

    #[tokio::test]
    async fn test_levels_convert_through_percent() {
        let (mut receiver, _handle) = make_receiver(1);
        let peer: SocketAddr = "10.0.0.5:5568".parse().unwrap();

        // Every raw value must survive the percent conversion untouched
        let slots: Vec<u8> = (0..=255).collect();
        receiver.process_datagram(&datagram(&CID_A, "desk", 1, 100, &slots), peer);

        for (i, &expected) in slots.iter().enumerate() {
            assert_eq!(receiver.channels[i], expected);
        }
    }
}
