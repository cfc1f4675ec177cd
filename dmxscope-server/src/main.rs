//! Command-line entry point.
//!
//! Each subcommand assembles an [`EventBus`], the subsystems it needs and a
//! console view, then hands the lot to [`Toplevel`] for signal handling and
//! orderly shutdown.

use clap::Parser;
use log::{error, info, warn};
use miette::{IntoDiagnostic, Result};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

use dmxscope_core::{ArtNetNode, DmxPacket, Protocol, SacnSourceInfo};
use dmxscope_server::error::DmxError;
use dmxscope_server::events::EventBus;
use dmxscope_server::recording::{
    default_recordings_dir, PlaybackEvent, Player, Recorder, RecordingManager,
};
use dmxscope_server::transport::{ArtNetReceiver, SacnReceiver};
use dmxscope_server::{Cli, Command, VERSION};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    info!("dmxscope {}", VERSION);

    let recordings_dir = args
        .recordings_dir
        .clone()
        .unwrap_or_else(default_recordings_dir);

    match args.command {
        Command::Monitor {
            protocol,
            universe,
            interface,
        } => monitor(protocol.into(), universe, interface).await,
        Command::Discover { timeout, interface } => {
            discover(Duration::from_secs(timeout), interface).await
        }
        Command::Record {
            protocol,
            universe,
            output,
            duration,
            interface,
        } => {
            record(
                recordings_dir,
                protocol.into(),
                universe,
                output,
                duration,
                interface,
            )
            .await
        }
        Command::Play {
            name,
            speed,
            r#loop,
        } => play(recordings_dir, name, speed, r#loop).await,
        Command::List => list(recordings_dir),
    }
}

/// The receiver subsystem for whichever protocol was asked for
enum Receiver {
    Sacn(SacnReceiver),
    Artnet(ArtNetReceiver),
}

fn build_receiver(
    protocol: Protocol,
    universe: u16,
    interface: Ipv4Addr,
    bus: &EventBus,
) -> Result<Receiver, DmxError> {
    Ok(match protocol {
        Protocol::Sacn => {
            let (receiver, _) = SacnReceiver::new(universe, interface, bus.clone())?;
            Receiver::Sacn(receiver)
        }
        Protocol::Artnet => {
            let (receiver, _) = ArtNetReceiver::new(interface, bus.clone());
            Receiver::Artnet(receiver)
        }
    })
}

fn start_receiver(s: &SubsystemHandle, receiver: Receiver) {
    match receiver {
        Receiver::Sacn(r) => {
            s.start(SubsystemBuilder::new("Sacn", |subsys| r.run(subsys)));
        }
        Receiver::Artnet(r) => {
            s.start(SubsystemBuilder::new("ArtNet", |subsys| r.run(subsys)));
        }
    }
}

async fn monitor(protocol: Protocol, universe: u16, interface: Option<Ipv4Addr>) -> Result<()> {
    let interface = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
    let bus = EventBus::new();
    let receiver = build_receiver(protocol, universe, interface, &bus).into_diagnostic()?;

    println!(
        "Monitoring universe {} over {} (Ctrl-C to stop)",
        universe, protocol
    );

    Toplevel::new(move |s| async move {
        start_receiver(&s, receiver);
        s.start(SubsystemBuilder::new("Console", move |subsys| {
            console_view(subsys, bus, false)
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(SHUTDOWN_TIMEOUT)
    .await
    .map_err(Into::into)
}

async fn discover(timeout: Duration, interface: Option<Ipv4Addr>) -> Result<()> {
    let interface = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
    let bus = EventBus::new();
    let (receiver, handle) = ArtNetReceiver::new(interface, bus);

    println!("Polling for Art-Net nodes ({}s)...", timeout.as_secs());

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("ArtNet", |subsys| receiver.run(subsys)));
        match handle.discover(timeout).await {
            Ok(nodes) => print_nodes(&nodes),
            Err(e) => error!("Discovery failed: {}", e),
        }
        s.request_shutdown();
    })
    .catch_signals()
    .handle_shutdown_requests(SHUTDOWN_TIMEOUT)
    .await
    .map_err(Into::into)
}

async fn record(
    recordings_dir: PathBuf,
    protocol: Protocol,
    universe: u16,
    output: Option<String>,
    duration: Option<u64>,
    interface: Option<Ipv4Addr>,
) -> Result<()> {
    let interface = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
    let manager = RecordingManager::new(recordings_dir);
    let filename = output.unwrap_or_else(|| manager.generate_filename(protocol, universe));
    let path = manager.create_path(&filename).into_diagnostic()?;

    let bus = EventBus::new();
    let receiver = build_receiver(protocol, universe, interface, &bus).into_diagnostic()?;

    Toplevel::new(move |s| async move {
        start_receiver(&s, receiver);
        s.start(SubsystemBuilder::new("Record", move |subsys| {
            record_session(subsys, bus, protocol, universe, path, duration)
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(SHUTDOWN_TIMEOUT)
    .await
    .map_err(Into::into)
}

async fn record_session(
    subsys: SubsystemHandle,
    bus: EventBus,
    protocol: Protocol,
    universe: u16,
    path: PathBuf,
    duration: Option<u64>,
) -> Result<(), DmxError> {
    let mut recorder = Recorder::new(bus);
    recorder.start(protocol, universe, &path)?;
    println!(
        "Recording universe {} over {} to {} (Ctrl-C to stop)",
        universe,
        protocol,
        path.display()
    );

    match duration {
        Some(secs) => {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {},
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!("Requested duration reached");
                },
            }
        }
        None => subsys.on_shutdown_requested().await,
    }

    let status = recorder.stop().await?;
    println!(
        "Recorded {} frames over {} ms to {} ({} bytes)",
        status.frame_count,
        status.duration_ms,
        path.display(),
        status.size_bytes
    );
    subsys.request_shutdown();
    Ok(())
}

async fn play(
    recordings_dir: PathBuf,
    name: String,
    speed: f64,
    loop_playback: bool,
) -> Result<()> {
    let manager = RecordingManager::new(recordings_dir);
    // A bare name resolves in the recordings directory; a path is taken as-is
    let path = if Path::new(&name).exists() {
        PathBuf::from(&name)
    } else {
        manager.resolve(&name).into_diagnostic()?
    };

    let bus = EventBus::new();
    let (player, handle) = Player::load(&path, bus.clone()).into_diagnostic()?;

    println!(
        "Playing {} at {}x{}",
        path.display(),
        speed,
        if loop_playback { ", looping" } else { "" }
    );

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("Player", |subsys| player.run(subsys)));
        s.start(SubsystemBuilder::new("Console", move |subsys| {
            console_view(subsys, bus, !loop_playback)
        }));

        if loop_playback {
            let _ = handle.set_loop(true).await;
        }
        if speed != 1.0 {
            let _ = handle.set_speed(speed).await;
        }
        if let Err(e) = handle.play().await {
            error!("Cannot start playback: {}", e);
            s.request_shutdown();
        }
    })
    .catch_signals()
    .handle_shutdown_requests(SHUTDOWN_TIMEOUT)
    .await
    .map_err(Into::into)
}

fn list(recordings_dir: PathBuf) -> Result<()> {
    let manager = RecordingManager::new(recordings_dir);
    let recordings = manager.list_recordings();

    if recordings.is_empty() {
        println!("No recordings in {}", manager.base_dir().display());
        return Ok(());
    }

    println!(
        "{:<36} {:<7} {:>8} {:>8} {:>9} {:>10}",
        "NAME", "PROTO", "UNIVERSE", "FRAMES", "LENGTH", "SIZE"
    );
    for info in recordings {
        println!(
            "{:<36} {:<7} {:>8} {:>8} {:>9} {:>10}",
            info.filename,
            info.protocol,
            info.universe,
            info.frame_count,
            format_duration(info.duration_ms),
            format_size(info.size)
        );
    }
    Ok(())
}

/// Shared console sink: prints whatever arrives on the bus. With
/// `exit_when_finished` set, the end of playback brings the process down.
async fn console_view(
    subsys: SubsystemHandle,
    bus: EventBus,
    exit_when_finished: bool,
) -> Result<(), DmxError> {
    let mut dmx_rx = bus.subscribe_dmx();
    let mut node_rx = bus.subscribe_nodes();
    let mut sources_rx = bus.subscribe_sources();
    let mut playback_rx = bus.subscribe_playback();

    loop {
        tokio::select! {
            _ = subsys.on_shutdown_requested() => {
                return Ok(());
            },
            r = dmx_rx.recv() => {
                match r {
                    Ok(packet) => print_packet(&packet),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Console lagging, skipped {} frames", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Ok(());
                    }
                }
            },
            r = node_rx.recv() => {
                match r {
                    Ok(node) => println!("Node discovered: {} [{}]", node, node.mac_address),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            },
            r = sources_rx.recv() => {
                match r {
                    Ok(sources) => print_sources(&sources),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            },
            r = playback_rx.recv() => {
                match r {
                    Ok(PlaybackEvent::Finished) if exit_when_finished => {
                        println!("Playback finished");
                        subsys.request_shutdown();
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            },
        }
    }
}

fn print_packet(packet: &DmxPacket) {
    let active = packet.channels.iter().filter(|&&v| v != 0).count();
    let head = packet.channels[..16]
        .iter()
        .map(|v| format!("{:3}", v))
        .collect::<Vec<_>>()
        .join(" ");
    println!(
        "{} u{:<4} [{}]  {:>3} active  {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        packet.universe,
        head,
        active,
        packet.source.as_deref().unwrap_or("-")
    );
}

fn print_sources(sources: &[SacnSourceInfo]) {
    println!("Source table ({}):", sources.len());
    for source in sources {
        println!(
            "  {} {}",
            if source.is_active { "*" } else { " " },
            source
        );
    }
}

fn print_nodes(nodes: &[ArtNetNode]) {
    if nodes.is_empty() {
        println!("No nodes answered");
        return;
    }
    println!(
        "{:<15} {:<18} {:<24} {:<10} {}",
        "ADDRESS", "SHORT NAME", "LONG NAME", "FIRMWARE", "UNIVERSES"
    );
    for node in nodes {
        let universes = node
            .universes
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<15} {:<18} {:<24} {:<10} {}",
            node.ip, node.short_name, node.long_name, node.firmware_version, universes
        );
    }
}

fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
