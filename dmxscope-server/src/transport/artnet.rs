//! Art-Net receiver.
//!
//! Listens on the standard port for ArtDmx traffic from every universe on
//! the subnet, keeps a running universe table, and answers on-demand node
//! discovery by broadcasting ArtPoll and collecting ArtPollReply packets
//! until a caller-supplied deadline.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};
use tokio_graceful_shutdown::SubsystemHandle;

use dmxscope_core::protocol::artnet::{self, OpCode, ARTNET_PORT};
use dmxscope_core::{ArtNetNode, DmxPacket, ParseError, UniverseInfo, DMX_CHANNELS};

use crate::error::DmxError;
use crate::events::EventBus;
use crate::network::{broadcast_for, create_udp_broadcast_listen, interface_exists};
use crate::transport::{now_ms, TransportStatistics};

/// Largest Art-Net datagram we expect; ArtDmx tops out at 530 bytes and
/// ArtPollReply at roughly half that.
const RECV_BUFFER_SIZE: usize = 1024;

const COMMAND_QUEUE_DEPTH: usize = 16;

/// Requests the receiver task answers for its handle
pub enum ArtNetCommand {
    Discover {
        timeout: Duration,
        reply: oneshot::Sender<Vec<ArtNetNode>>,
    },
    Universes {
        reply: oneshot::Sender<Vec<UniverseInfo>>,
    },
    Nodes {
        reply: oneshot::Sender<Vec<ArtNetNode>>,
    },
    ClearUniverses,
    Statistics {
        reply: oneshot::Sender<TransportStatistics>,
    },
}

/// Cloneable front for a running [`ArtNetReceiver`].
///
/// Every method turns a closed channel into [`DmxError::Shutdown`]: once the
/// receiver task is gone there is nothing useful left to report.
#[derive(Clone)]
pub struct ArtNetHandle {
    command_tx: mpsc::Sender<ArtNetCommand>,
}

impl ArtNetHandle {
    /// Broadcast an ArtPoll and return every node heard from before the
    /// timeout expires. Nodes from earlier polls stay in the table, so the
    /// result is cumulative for the life of the receiver.
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<ArtNetNode>, DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(ArtNetCommand::Discover { timeout, reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)
    }

    pub async fn universes(&self) -> Result<Vec<UniverseInfo>, DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(ArtNetCommand::Universes { reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)
    }

    pub async fn nodes(&self) -> Result<Vec<ArtNetNode>, DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(ArtNetCommand::Nodes { reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)
    }

    pub async fn clear_universes(&self) -> Result<(), DmxError> {
        self.command_tx
            .send(ArtNetCommand::ClearUniverses)
            .await
            .map_err(|_| DmxError::Shutdown)
    }

    pub async fn statistics(&self) -> Result<TransportStatistics, DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(ArtNetCommand::Statistics { reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)
    }
}

struct PendingDiscovery {
    deadline: Instant,
    reply: oneshot::Sender<Vec<ArtNetNode>>,
}

pub struct ArtNetReceiver {
    bind: SocketAddrV4,
    bus: EventBus,
    sock: Option<UdpSocket>,
    command_rx: mpsc::Receiver<ArtNetCommand>,
    universes: BTreeMap<u16, UniverseInfo>,
    nodes: BTreeMap<Ipv4Addr, ArtNetNode>,
    /// Last full channel state per universe; ArtDmx frames shorter than 512
    /// channels only overwrite their prefix
    channels: BTreeMap<u16, [u8; DMX_CHANNELS]>,
    statistics: TransportStatistics,
    pending: Vec<PendingDiscovery>,
    commands_closed: bool,
}

impl ArtNetReceiver {
    pub fn new(interface: Ipv4Addr, bus: EventBus) -> (ArtNetReceiver, ArtNetHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let receiver = ArtNetReceiver {
            bind: SocketAddrV4::new(interface, ARTNET_PORT),
            bus,
            sock: None,
            command_rx,
            universes: BTreeMap::new(),
            nodes: BTreeMap::new(),
            channels: BTreeMap::new(),
            statistics: TransportStatistics::default(),
            pending: Vec::new(),
            commands_closed: false,
        };
        (receiver, ArtNetHandle { command_tx })
    }

    fn start_socket(&mut self) -> Result<(), DmxError> {
        if !interface_exists(self.bind.ip()) {
            return Err(DmxError::InterfaceNotFound(*self.bind.ip()));
        }
        let sock = create_udp_broadcast_listen(&self.bind)?;
        log::debug!("{}: listening for Art-Net packets", self.bind);
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
                        log::warn!("{}: socket loop ended: {:?}, reopening", self.bind, r);
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
        log::trace!("{}: starting socket loop", self.bind);

        loop {
            let next_deadline = self.pending.iter().map(|p| p.deadline).min();
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    return Err(DmxError::Shutdown);
                },
                r = self.command_rx.recv(), if !self.commands_closed => {
                    match r {
                        Some(command) => {
                            self.handle_command(command).await?;
                        }
                        None => {
                            // All handles dropped; keep receiving, packets
                            // still go out on the bus
                            log::debug!("{}: command channel closed", self.bind);
                            self.commands_closed = true;
                        }
                    }
                },
                _ = tokio::time::sleep_until(
                    next_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(60))
                ), if next_deadline.is_some() => {
                    self.finish_discoveries();
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

    async fn handle_command(&mut self, command: ArtNetCommand) -> Result<(), DmxError> {
        match command {
            ArtNetCommand::Discover { timeout, reply } => {
                self.pending.push(PendingDiscovery {
                    deadline: Instant::now() + timeout,
                    reply,
                });
                self.send_poll().await?;
            }
            ArtNetCommand::Universes { reply } => {
                let _ = reply.send(self.universes.values().cloned().collect());
            }
            ArtNetCommand::Nodes { reply } => {
                let _ = reply.send(self.nodes.values().cloned().collect());
            }
            ArtNetCommand::ClearUniverses => {
                self.universes.clear();
                self.channels.clear();
            }
            ArtNetCommand::Statistics { reply } => {
                let _ = reply.send(self.statistics.clone());
            }
        }
        Ok(())
    }

    async fn send_poll(&self) -> Result<(), DmxError> {
        let Some(sock) = self.sock.as_ref() else {
            return Ok(());
        };
        let target = SocketAddrV4::new(broadcast_for(self.bind.ip()), ARTNET_PORT);
        sock.send_to(&artnet::build_poll(), SocketAddr::V4(target))
            .await
            .map_err(DmxError::Io)?;
        log::debug!("Sent ArtPoll to {}", target);
        Ok(())
    }

    /// Resolve every discovery whose deadline has passed with the current
    /// node table
    fn finish_discoveries(&mut self) {
        let now = Instant::now();
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].deadline <= now {
                let pending = self.pending.swap_remove(i);
                let nodes: Vec<ArtNetNode> = self.nodes.values().cloned().collect();
                log::debug!("Discovery window closed, {} node(s)", nodes.len());
                if pending.reply.send(nodes).is_err() {
                    log::debug!("Discovery requester went away");
                }
            } else {
                i += 1;
            }
        }
    }

    fn process_datagram(&mut self, data: &[u8], peer: SocketAddr) {
        let op = match artnet::packet_op_code(data) {
            Ok(op) => op,
            Err(e) => {
                log::debug!("{}: not an Art-Net packet: {}", peer, e);
                self.statistics.malformed();
                return;
            }
        };
        match op {
            OpCode::Dmx => self.handle_dmx(data, peer),
            OpCode::PollReply => self.handle_poll_reply(data, peer),
            OpCode::Poll => {
                // Another controller is polling; we only listen
                log::trace!("{}: ArtPoll seen", peer);
            }
        }
    }

    fn handle_dmx(&mut self, data: &[u8], peer: SocketAddr) {
        let dmx = match artnet::parse_dmx(data) {
            Ok(dmx) => dmx,
            Err(e @ ParseError::InvalidUniverse(_)) => {
                log::warn!("{}: dropping ArtDmx: {}", peer, e);
                self.statistics.dropped();
                return;
            }
            Err(e) => {
                log::debug!("{}: malformed ArtDmx: {}", peer, e);
                self.statistics.malformed();
                return;
            }
        };
        self.statistics.received();
        let now = now_ms();
        let source = peer.to_string();

        match self.universes.entry(dmx.universe) {
            Entry::Vacant(slot) => {
                log::info!("New universe {} from {}", dmx.universe, peer);
                slot.insert(UniverseInfo::new(dmx.universe, now, Some(source.clone())));
                self.bus.publish_universe(dmx.universe);
            }
            Entry::Occupied(mut slot) => {
                slot.get_mut().update(now, Some(source.clone()));
            }
        }

        let channels = self
            .channels
            .entry(dmx.universe)
            .or_insert([0; DMX_CHANNELS]);
        channels[..dmx.data.len()].copy_from_slice(&dmx.data);

        self.bus.publish_dmx(DmxPacket {
            universe: dmx.universe,
            channels: *channels,
            source: Some(source),
            priority: None,
            // Sequence 0 means the sender does not number its frames
            sequence: if dmx.sequence == 0 {
                None
            } else {
                Some(dmx.sequence)
            },
            timestamp: now,
        });
    }

    fn handle_poll_reply(&mut self, data: &[u8], peer: SocketAddr) {
        let ip = match peer {
            SocketAddr::V4(addr) => *addr.ip(),
            SocketAddr::V6(_) => {
                log::debug!("{}: ignoring ArtPollReply over IPv6", peer);
                return;
            }
        };
        let node = match artnet::parse_poll_reply(data, ip, now_ms()) {
            Ok(node) => node,
            Err(e) => {
                log::debug!("{}: malformed ArtPollReply: {}", peer, e);
                self.statistics.malformed();
                return;
            }
        };
        match self.nodes.entry(ip) {
            Entry::Vacant(slot) => {
                log::info!("Discovered Art-Net node {}", node);
                slot.insert(node.clone());
                self.bus.publish_node(node);
            }
            Entry::Occupied(mut slot) => {
                slot.insert(node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_receiver() -> (ArtNetReceiver, ArtNetHandle) {
        ArtNetReceiver::new(Ipv4Addr::UNSPECIFIED, EventBus::new())
    }

    fn dmx_datagram(universe: u16, data: &[u8]) -> Vec<u8> {
        artnet::build_dmx(universe, 1, data).unwrap()
    }

    #[tokio::test]
    async fn test_dmx_updates_universe_table() {
        let (mut receiver, _handle) = make_receiver();
        let peer: SocketAddr = "10.0.0.9:6454".parse().unwrap();

        receiver.process_datagram(&dmx_datagram(4, &[10, 20]), peer);
        receiver.process_datagram(&dmx_datagram(4, &[11, 21]), peer);

        let info = receiver.universes.get(&4).unwrap();
        assert_eq!(info.packet_count, 2);
        assert_eq!(info.source.as_deref(), Some("10.0.0.9:6454"));
        assert_eq!(receiver.statistics.packets_received, 2);
    }

    #[tokio::test]
    async fn test_short_frame_keeps_previous_channel_tail() {
        let (mut receiver, _handle) = make_receiver();
        let bus = receiver.bus.clone();
        let mut rx = bus.subscribe_dmx();
        let peer: SocketAddr = "10.0.0.9:6454".parse().unwrap();

        let mut full = [0u8; DMX_CHANNELS];
        full[511] = 99;
        receiver.process_datagram(&dmx_datagram(0, &full), peer);
        // Shorter follow-up frame only touches the first two channels
        receiver.process_datagram(&dmx_datagram(0, &[1, 2]), peer);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.channels[511], 99);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.channels[0], 1);
        assert_eq!(second.channels[511], 99);
    }

    #[tokio::test]
    async fn test_invalid_universe_counts_as_dropped() {
        let (mut receiver, _handle) = make_receiver();
        let peer: SocketAddr = "10.0.0.9:6454".parse().unwrap();

        let mut datagram = dmx_datagram(0, &[1, 2]);
        // Patch in a universe beyond the valid range
        datagram[14..16].copy_from_slice(&64000u16.to_le_bytes());

        receiver.process_datagram(&datagram, peer);
        assert_eq!(receiver.statistics.dropped_packets, 1);
        assert_eq!(receiver.statistics.packets_received, 0);
        assert!(receiver.universes.is_empty());
    }

    #[tokio::test]
    async fn test_garbage_counts_as_malformed() {
        let (mut receiver, _handle) = make_receiver();
        let peer: SocketAddr = "10.0.0.9:6454".parse().unwrap();

        receiver.process_datagram(b"not artnet at all", peer);
        assert_eq!(receiver.statistics.malformed_packets, 1);
    }

    #[tokio::test]
    async fn test_clear_universes_resets_channel_cache() {
        let (mut receiver, _handle) = make_receiver();
        let peer: SocketAddr = "10.0.0.9:6454".parse().unwrap();

        receiver.process_datagram(&dmx_datagram(2, &[5, 6, 7]), peer);
        assert!(!receiver.universes.is_empty());

        receiver
            .handle_command(ArtNetCommand::ClearUniverses)
            .await
            .unwrap();
        assert!(receiver.universes.is_empty());
        assert!(receiver.channels.is_empty());
    }
}
