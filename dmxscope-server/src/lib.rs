//! # DmxScope Server
//!
//! DMX512 network monitor with recording and playback.
//!
//! This crate provides a complete lighting-network monitor that:
//! - Receives live DMX over sACN (E1.31) multicast and Art-Net broadcast
//! - Discovers Art-Net nodes on the local network
//! - Arbitrates between competing sACN sources by priority
//! - Records a universe's channel states to `.dmxrec` files
//! - Plays recordings back with pause, seek, loop and speed control
//!
//! ## Architecture
//!
//! The server is built on top of [`dmxscope_core`] for platform-independent
//! protocol handling, with [`tokio`] providing the async runtime.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    dmxscope-server                      │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────┐  │
//! │  │ SacnReceiver │  │ ArtNetRecv   │  │ Player        │  │
//! │  │ (multicast)  │  │ (broadcast)  │  │ (.dmxrec)     │  │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬────────┘  │
//! │         │                 │                 │           │
//! │         ▼                 ▼                 ▼           │
//! │  ┌─────────────────────────────────────────────────────┐│
//! │  │              EventBus (broadcast channels)          ││
//! │  │  - DMX frames, universes, nodes, sources, playback  ││
//! │  └──────┬──────────────────────────────┬───────────────┘│
//! │         │                              │                │
//! │         ▼                              ▼                │
//! │  ┌──────────────┐               ┌──────────────┐        │
//! │  │ Console view │               │ Recorder     │        │
//! │  │ (stdout)     │               │ (.dmxrec)    │        │
//! │  └──────────────┘               └──────────────┘        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Wire parsing and source arbitration live in [`dmxscope_core`]; this crate
//! owns the sockets, the files and the clock.
//!
//! ## Command-Line Interface
//!
//! | Subcommand | Description |
//! |------------|-------------|
//! | `monitor`  | Print live DMX traffic for a universe |
//! | `discover` | Poll for Art-Net nodes and print what answered |
//! | `record`   | Capture a universe to a `.dmxrec` file |
//! | `play`     | Re-emit a recording with its original timing |
//! | `list`     | List recordings with their metadata |
//!
//! See [`Cli`] for all options. `-v`/`-q` adjust verbosity, and
//! `--recordings-dir` overrides where recordings are kept.

extern crate tokio;

use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use dmxscope_core::Protocol;

pub mod error;
pub mod events;
pub mod network;
pub mod recording;
pub mod transport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol selection on the command line.
///
/// Mirrors [`Protocol`]; a separate type so the clap derive stays out of
/// the core crate.
#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ProtocolArg {
    /// sACN (E1.31) multicast
    #[default]
    Sacn,
    /// Art-Net broadcast
    Artnet,
}

impl From<ProtocolArg> for Protocol {
    fn from(value: ProtocolArg) -> Self {
        match value {
            ProtocolArg::Sacn => Protocol::Sacn,
            ProtocolArg::Artnet => Protocol::Artnet,
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(name = "dmxscope", version)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Directory for recording files
    #[arg(long, global = true)]
    pub recordings_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Clone, Debug)]
pub enum Command {
    /// Print live DMX traffic for a universe
    Monitor {
        /// Protocol to listen with
        #[arg(short, long, value_enum, default_value_t)]
        protocol: ProtocolArg,

        /// Universe to monitor
        #[arg(short, long, default_value_t = 1)]
        universe: u16,

        /// Limit listening to a single interface address
        #[arg(short, long)]
        interface: Option<Ipv4Addr>,
    },

    /// Poll for Art-Net nodes and print what answered
    Discover {
        /// How long to wait for replies, in seconds
        #[arg(short, long, default_value_t = 3)]
        timeout: u64,

        /// Limit discovery to a single interface address
        #[arg(short, long)]
        interface: Option<Ipv4Addr>,
    },

    /// Capture a universe to a .dmxrec file
    Record {
        /// Protocol to listen with
        #[arg(short, long, value_enum, default_value_t)]
        protocol: ProtocolArg,

        /// Universe to record
        #[arg(short, long, default_value_t = 1)]
        universe: u16,

        /// Output filename; generated from protocol, universe and
        /// start time when absent
        #[arg(short, long)]
        output: Option<String>,

        /// Stop after this many seconds instead of running until Ctrl-C
        #[arg(short, long)]
        duration: Option<u64>,

        /// Limit listening to a single interface address
        #[arg(short, long)]
        interface: Option<Ipv4Addr>,
    },

    /// Re-emit a recording with its original timing
    Play {
        /// Recording name (resolved in the recordings directory) or a path
        name: String,

        /// Playback speed multiplier, 0.1 to 10
        #[arg(short, long, default_value_t = 1.0)]
        speed: f64,

        /// Start over at the end instead of stopping
        #[arg(short, long, default_value_t = false)]
        r#loop: bool,
    },

    /// List recordings with their metadata
    List,
}
