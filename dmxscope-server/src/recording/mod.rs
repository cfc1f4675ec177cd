//! DMX recording and playback module.
//!
//! This module provides functionality to:
//! - Record a universe's channel states to `.dmxrec` files
//! - Play back recordings as if they were live input
//! - Manage recording files (list, name, resolve)
//!
//! ## File Format
//!
//! The `.dmxrec` format is a compact binary format built around delta
//! compression:
//!
//! ```text
//! ┌──────────────────────────┐
//! │ Header (32 bytes)        │  magic "DMXR", version, protocol, universe
//! ├──────────────────────────┤
//! │ Frame 0                  │  varint time delta + snapshot (512 channels)
//! │ Frame 1                  │  varint time delta + changed channels only
//! │ ...                      │
//! └──────────────────────────┘
//! ```
//!
//! Full snapshots recur at a bounded interval so seeking never replays more
//! than a few seconds of deltas.

pub mod file_format;
pub mod manager;
pub mod player;
pub mod recorder;

pub use file_format::{
    FrameEncoder, RecordingFrame, RecordingHeader, RecordingReader, RecordingWriter,
};
pub use manager::{default_recordings_dir, RecordingInfo, RecordingManager};
pub use player::{PlaybackEvent, PlaybackState, PlaybackStatus, Player, PlayerHandle};
pub use recorder::{start_recording, ActiveRecording, Recorder, RecordingStatus};
