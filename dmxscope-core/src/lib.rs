//! # dmxscope Core
//!
//! Platform-independent protocol library for DMX512-over-IP lighting
//! networks.
//!
//! This crate contains pure parsing, construction and merge logic with
//! **zero I/O dependencies**: no sockets, no files, no async runtime. All
//! state machines take the clock as a parameter, so every policy in here is
//! testable from plain unit tests.
//!
//! ## Architecture
//!
//! `dmxscope-core` is the foundation under `dmxscope-server`, which binds
//! the logic here to real UDP sockets, timers and recording files.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  dmxscope-core (platform-independent, no tokio/socket deps)  │
//! │  ├── protocol/artnet  (ArtDmx / ArtPoll / ArtPollReply)      │
//! │  ├── protocol/sacn    (E1.31 data packets)                   │
//! │  ├── merge            (multi-source priority arbitration)    │
//! │  └── dmx              (DmxPacket and discovery records)      │
//! └──────────────────────────────────────────────────────────────┘
//!                              ▲
//!                 ┌────────────┴────────────┐
//!                 │  dmxscope-server        │
//!                 │  (tokio, sockets, CLI)  │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Key Modules
//!
//! - [`protocol`] - Wire protocol parsing and packet construction
//! - [`merge`] - Highest-priority-wins arbitration across sACN sources
//! - [`dmx`] - Shared records: packets, universes, nodes, sources
//! - [`error`] - Parse error taxonomy
//!
//! ## Example: Parsing an Art-Net Datagram
//!
//! ```rust
//! use dmxscope_core::protocol::artnet;
//!
//! let pkt = artnet::build_dmx(1, 0, &[255, 128]).unwrap();
//! let dmx = artnet::parse_dmx(&pkt).unwrap();
//! assert_eq!(dmx.universe, 1);
//! assert_eq!(dmx.data, vec![255, 128]);
//! ```
//!
//! ## Example: Arbitrating sACN Sources
//!
//! ```rust
//! use dmxscope_core::merge::{SourceFrame, SourceRegistry};
//!
//! let mut registry = SourceRegistry::new();
//! let frame = SourceFrame {
//!     universe: 1,
//!     levels: &[100.0],
//!     name: "desk",
//!     cid: None,
//!     address: None,
//!     priority: 100,
//!     sequence: None,
//! };
//! let out = registry.ingest(&frame, 0);
//! assert_eq!(out.emit, Some(vec![255]));
//! ```

pub mod dmx;
pub mod error;
pub mod merge;
pub mod protocol;

// Re-export commonly used types
pub use dmx::{ArtNetNode, DmxPacket, Protocol, SacnSourceInfo, UniverseInfo, DMX_CHANNELS};
pub use error::ParseError;
pub use merge::{Ingest, SourceFrame, SourceRegistry};
