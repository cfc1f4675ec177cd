//! DMXR recording file format.
//!
//! Binary format for capturing a universe's channel states over time with
//! delta compression: full 512-channel snapshots at bounded intervals,
//! channel-level deltas in between.

use std::io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use dmxscope_core::{Protocol, DMX_CHANNELS};

use crate::error::DmxError;

/// Magic bytes at the start of every recording file
pub const RECORDING_MAGIC: [u8; 4] = *b"DMXR";

/// Current format version
pub const FORMAT_VERSION: u8 = 1;

/// Header size in bytes (fixed)
pub const HEADER_LEN: usize = 32;

/// Header flag: frames use delta compression (always set by this writer)
pub const FLAG_DELTA_COMPRESSED: u8 = 0x01;

/// Frame marker: full 512-channel snapshot follows
pub const SNAPSHOT_MARKER: u8 = 0xFE;

/// Frame marker: a 16-bit change count follows
pub const EXTENDED_COUNT_MARKER: u8 = 0xFF;

/// Largest change count encodable in the marker byte itself
pub const MAX_INLINE_COUNT: usize = 253;

/// A snapshot is forced whenever this much time passed since the last one,
/// so seeking never replays more than a few seconds of deltas
pub const SNAPSHOT_INTERVAL_MS: u64 = 5000;

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

// ============================================================================
// Varint
// ============================================================================

/// Write an unsigned LEB128 varint: 7 bits per byte, lowest group first,
/// high bit set on every byte except the last.
pub fn write_varint<W: Write>(writer: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            return writer.write_all(&[byte]);
        }
        writer.write_all(&[byte | 0x80])?;
    }
}

pub fn read_varint<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        if shift >= 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint longer than 64 bits",
            ));
        }
        value |= ((byte[0] & 0x7F) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn varint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    ((bits + 6) / 7).max(1)
}

// ============================================================================
// Header
// ============================================================================

/// File header (32 bytes fixed size)
#[derive(Clone, Debug, PartialEq)]
pub struct RecordingHeader {
    /// Format version (currently 1)
    pub version: u8,
    /// Format flags
    pub flags: u8,
    /// Transport the recording was captured from
    pub protocol: Protocol,
    /// Universe number, in the protocol's own numbering
    pub universe: u16,
    /// Recording start time (Unix timestamp in milliseconds)
    pub start_time: i64,
    /// Total wall-clock duration in milliseconds
    pub duration_ms: u32,
    /// Total number of frames
    pub frame_count: u32,
}

impl RecordingHeader {
    pub fn new(protocol: Protocol, universe: u16, start_time: i64) -> Self {
        RecordingHeader {
            version: FORMAT_VERSION,
            flags: FLAG_DELTA_COMPRESSED,
            protocol,
            universe,
            start_time,
            duration_ms: 0,
            frame_count: 0,
        }
    }

    /// Write header to writer
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = [0u8; HEADER_LEN];

        // Magic (4 bytes)
        buf[0..4].copy_from_slice(&RECORDING_MAGIC);
        // Version (1 byte)
        buf[4] = self.version;
        // Flags (1 byte)
        buf[5] = self.flags;
        // Protocol (1 byte)
        buf[6] = self.protocol.to_byte();
        // Universe (2 bytes)
        buf[7..9].copy_from_slice(&self.universe.to_le_bytes());
        // Start time (8 bytes)
        buf[9..17].copy_from_slice(&self.start_time.to_le_bytes());
        // Duration (4 bytes)
        buf[17..21].copy_from_slice(&self.duration_ms.to_le_bytes());
        // Frame count (4 bytes)
        buf[21..25].copy_from_slice(&self.frame_count.to_le_bytes());
        // Remaining 7 bytes are reserved (already zeroed)

        writer.write_all(&buf)
    }

    /// Read header from reader
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; HEADER_LEN];
        reader.read_exact(&mut buf)?;

        if buf[0..4] != RECORDING_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid recording: bad magic bytes",
            ));
        }

        let version = buf[4];
        if version > FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported recording version: {}", version),
            ));
        }

        let protocol = Protocol::from_byte(buf[6]).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown protocol byte: {}", buf[6]),
            )
        })?;

        Ok(RecordingHeader {
            version,
            flags: buf[5],
            protocol,
            universe: u16::from_le_bytes([buf[7], buf[8]]),
            start_time: i64::from_le_bytes([
                buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15], buf[16],
            ]),
            duration_ms: u32::from_le_bytes([buf[17], buf[18], buf[19], buf[20]]),
            frame_count: u32::from_le_bytes([buf[21], buf[22], buf[23], buf[24]]),
        })
    }
}

// ============================================================================
// Frames
// ============================================================================

/// One recorded frame: a varint time delta followed by either a full
/// snapshot or a list of changed channels.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordingFrame {
    /// Full 512-channel state
    Snapshot {
        /// Milliseconds since the previous frame
        delta_ms: u64,
        channels: [u8; DMX_CHANNELS],
    },
    /// Channels that differ from the previous frame, ascending by channel
    Delta {
        delta_ms: u64,
        changes: Vec<(u16, u8)>,
    },
}

impl RecordingFrame {
    pub fn delta_ms(&self) -> u64 {
        match self {
            RecordingFrame::Snapshot { delta_ms, .. } => *delta_ms,
            RecordingFrame::Delta { delta_ms, .. } => *delta_ms,
        }
    }

    /// Apply this frame on top of an existing channel state
    pub fn apply(&self, channels: &mut [u8; DMX_CHANNELS]) {
        match self {
            RecordingFrame::Snapshot { channels: full, .. } => {
                channels.copy_from_slice(full);
            }
            RecordingFrame::Delta { changes, .. } => {
                for &(channel, value) in changes {
                    channels[channel as usize] = value;
                }
            }
        }
    }

    /// Write frame to writer
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            RecordingFrame::Snapshot { delta_ms, channels } => {
                write_varint(writer, *delta_ms)?;
                writer.write_all(&[SNAPSHOT_MARKER])?;
                writer.write_all(channels)
            }
            RecordingFrame::Delta { delta_ms, changes } => {
                write_varint(writer, *delta_ms)?;
                if changes.len() <= MAX_INLINE_COUNT {
                    writer.write_all(&[changes.len() as u8])?;
                } else {
                    writer.write_all(&[EXTENDED_COUNT_MARKER])?;
                    writer.write_all(&(changes.len() as u16).to_le_bytes())?;
                }
                for &(channel, value) in changes {
                    writer.write_all(&channel.to_le_bytes())?;
                    writer.write_all(&[value])?;
                }
                Ok(())
            }
        }
    }

    /// Read frame from reader
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let delta_ms = read_varint(reader)?;

        let mut marker = [0u8; 1];
        reader.read_exact(&mut marker)?;

        match marker[0] {
            SNAPSHOT_MARKER => {
                let mut channels = [0u8; DMX_CHANNELS];
                reader.read_exact(&mut channels)?;
                Ok(RecordingFrame::Snapshot { delta_ms, channels })
            }
            EXTENDED_COUNT_MARKER => {
                let mut count_buf = [0u8; 2];
                reader.read_exact(&mut count_buf)?;
                let count = u16::from_le_bytes(count_buf) as usize;
                Self::read_changes(reader, count, delta_ms)
            }
            count => Self::read_changes(reader, count as usize, delta_ms),
        }
    }

    fn read_changes<R: Read>(reader: &mut R, count: usize, delta_ms: u64) -> io::Result<Self> {
        if count > DMX_CHANNELS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} changes in one frame", count),
            ));
        }
        let mut changes = Vec::with_capacity(count);
        for _ in 0..count {
            let mut buf = [0u8; 3];
            reader.read_exact(&mut buf)?;
            let channel = u16::from_le_bytes([buf[0], buf[1]]);
            if channel as usize >= DMX_CHANNELS {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("channel {} out of range", channel),
                ));
            }
            changes.push((channel, buf[2]));
        }
        Ok(RecordingFrame::Delta { delta_ms, changes })
    }

    /// Encoded size of this frame in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            RecordingFrame::Snapshot { delta_ms, .. } => {
                varint_len(*delta_ms) + 1 + DMX_CHANNELS
            }
            RecordingFrame::Delta { delta_ms, changes } => {
                let count_len = if changes.len() <= MAX_INLINE_COUNT { 1 } else { 3 };
                varint_len(*delta_ms) + count_len + 3 * changes.len()
            }
        }
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// Turns successive channel states into delta-compressed frames.
///
/// The first state always becomes a snapshot at delta 0. After that a frame
/// is only produced when something changed, except that a snapshot is forced
/// once [`SNAPSHOT_INTERVAL_MS`] passed since the previous one. A skipped
/// state does not advance the frame clock: the next written frame's delta
/// spans all the way back to the last written frame.
#[derive(Debug, Default)]
pub struct FrameEncoder {
    previous: Option<[u8; DMX_CHANNELS]>,
    last_frame_at: u64,
    last_snapshot_at: u64,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(
        &mut self,
        channels: &[u8; DMX_CHANNELS],
        now_ms: u64,
    ) -> Option<RecordingFrame> {
        let Some(previous) = self.previous else {
            self.previous = Some(*channels);
            self.last_frame_at = now_ms;
            self.last_snapshot_at = now_ms;
            return Some(RecordingFrame::Snapshot {
                delta_ms: 0,
                channels: *channels,
            });
        };

        let delta_ms = now_ms.saturating_sub(self.last_frame_at);

        if now_ms.saturating_sub(self.last_snapshot_at) >= SNAPSHOT_INTERVAL_MS {
            self.previous = Some(*channels);
            self.last_frame_at = now_ms;
            self.last_snapshot_at = now_ms;
            return Some(RecordingFrame::Snapshot {
                delta_ms,
                channels: *channels,
            });
        }

        let changes: Vec<(u16, u8)> = previous
            .iter()
            .zip(channels.iter())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, (_, &b))| (i as u16, b))
            .collect();
        if changes.is_empty() {
            return None;
        }

        self.previous = Some(*channels);
        self.last_frame_at = now_ms;
        Some(RecordingFrame::Delta { delta_ms, changes })
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Writer for creating DMXR files
pub struct RecordingWriter<W: Write + Seek> {
    writer: BufWriter<W>,
    header: RecordingHeader,
    bytes_written: u64,
}

impl<W: Write + Seek> RecordingWriter<W> {
    /// Write a provisional header; the real duration and frame count land
    /// when [`finish`](Self::finish) rewrites it.
    pub fn new(inner: W, mut header: RecordingHeader) -> io::Result<Self> {
        header.duration_ms = 0;
        header.frame_count = 0;

        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, inner);
        header.write(&mut writer)?;

        Ok(RecordingWriter {
            writer,
            header,
            bytes_written: HEADER_LEN as u64,
        })
    }

    pub fn write_frame(&mut self, frame: &RecordingFrame) -> io::Result<()> {
        frame.write(&mut self.writer)?;
        self.header.frame_count += 1;
        self.bytes_written += frame.encoded_len() as u64;
        Ok(())
    }

    pub fn frame_count(&self) -> u32 {
        self.header.frame_count
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Rewrite the header with final values and hand back the inner writer
    pub fn finish(mut self, duration_ms: u32) -> io::Result<W> {
        self.header.duration_ms = duration_ms;

        self.writer.seek(SeekFrom::Start(0))?;
        self.header.write(&mut self.writer)?;
        self.writer.flush()?;
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Snapshot position used for seeking
#[derive(Clone, Debug)]
struct IndexEntry {
    /// Byte offset of the snapshot frame
    offset: usize,
    /// Ordinal of the snapshot among all frames
    frame_index: u32,
    /// Cumulative time before the snapshot fires
    prior_ms: u64,
    /// Cumulative time when the snapshot fires
    fire_ms: u64,
}

/// Reader for DMXR files.
///
/// The whole file is held in memory; recordings are channel deltas and stay
/// small even for long sessions. The snapshot index for seeking is built
/// lazily on the first seek.
#[derive(Debug)]
pub struct RecordingReader {
    header: RecordingHeader,
    data: Vec<u8>,
    pos: usize,
    frames_read: u32,
    position_ms: u64,
    snapshot_index: Option<Vec<IndexEntry>>,
}

impl RecordingReader {
    pub fn from_bytes(data: Vec<u8>) -> io::Result<Self> {
        let mut cursor = Cursor::new(&data);
        let header = RecordingHeader::read(&mut cursor)?;
        Ok(RecordingReader {
            header,
            data,
            pos: HEADER_LEN,
            frames_read: 0,
            position_ms: 0,
            snapshot_index: None,
        })
    }

    /// Load a recording from disk, reporting malformed files with the path
    /// in the error
    pub fn open(path: &Path) -> Result<Self, DmxError> {
        let data = std::fs::read(path)?;
        if data.len() < HEADER_LEN {
            return Err(DmxError::FileTooSmall {
                path: path.to_path_buf(),
            });
        }
        if data[0..4] != RECORDING_MAGIC {
            return Err(DmxError::BadMagic {
                path: path.to_path_buf(),
            });
        }
        if data[4] > FORMAT_VERSION {
            return Err(DmxError::UnsupportedVersion {
                path: path.to_path_buf(),
                version: data[4],
                supported: FORMAT_VERSION,
            });
        }
        Self::from_bytes(data).map_err(DmxError::Io)
    }

    pub fn header(&self) -> &RecordingHeader {
        &self.header
    }

    /// Fire time of the most recently decoded frame, in milliseconds from
    /// the start of the recording
    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    /// Decode the next frame, or `None` past the last one
    pub fn next_frame(&mut self) -> io::Result<Option<RecordingFrame>> {
        if self.frames_read >= self.header.frame_count {
            return Ok(None);
        }
        let mut cursor = Cursor::new(&self.data[self.pos..]);
        let frame = RecordingFrame::read(&mut cursor)?;
        self.pos += cursor.position() as usize;
        self.frames_read += 1;
        self.position_ms += frame.delta_ms();
        Ok(Some(frame))
    }

    /// Reset to the first frame
    pub fn rewind(&mut self) {
        self.pos = HEADER_LEN;
        self.frames_read = 0;
        self.position_ms = 0;
    }

    fn ensure_index(&mut self) -> io::Result<()> {
        if self.snapshot_index.is_some() {
            return Ok(());
        }
        let mut index = Vec::new();
        let mut pos = HEADER_LEN;
        let mut cum = 0u64;
        for frame_index in 0..self.header.frame_count {
            let offset = pos;
            let prior_ms = cum;
            let mut cursor = Cursor::new(&self.data[pos..]);
            let frame = RecordingFrame::read(&mut cursor)?;
            pos += cursor.position() as usize;
            cum += frame.delta_ms();
            if matches!(frame, RecordingFrame::Snapshot { .. }) {
                index.push(IndexEntry {
                    offset,
                    frame_index,
                    prior_ms,
                    fire_ms: cum,
                });
            }
        }
        self.snapshot_index = Some(index);
        Ok(())
    }

    /// Position playback at `target_ms`.
    ///
    /// Reconstructs the channel state into `channels` by applying the newest
    /// snapshot at or before the target and replaying deltas up to it. The
    /// first frame past the target is NOT applied; it comes out of the next
    /// [`next_frame`](Self::next_frame) call.
    pub fn seek(&mut self, target_ms: u64, channels: &mut [u8; DMX_CHANNELS]) -> io::Result<()> {
        self.ensure_index()?;
        channels.fill(0);
        self.rewind();

        let entry = self
            .snapshot_index
            .as_ref()
            .and_then(|index| index.iter().rev().find(|e| e.fire_ms <= target_ms))
            .map(|e| (e.offset, e.frame_index, e.prior_ms));
        if let Some((offset, frame_index, prior_ms)) = entry {
            self.pos = offset;
            self.frames_read = frame_index;
            self.position_ms = prior_ms;
        }

        loop {
            let pos = self.pos;
            let frames_read = self.frames_read;
            let position_ms = self.position_ms;
            match self.next_frame()? {
                Some(frame) => {
                    if self.position_ms > target_ms {
                        // Put the frame back; it fires after the target
                        self.pos = pos;
                        self.frames_read = frames_read;
                        self.position_ms = position_ms;
                        return Ok(());
                    }
                    frame.apply(channels);
                }
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels_with(values: &[(usize, u8)]) -> [u8; DMX_CHANNELS] {
        let mut channels = [0u8; DMX_CHANNELS];
        for &(i, v) in values {
            channels[i] = v;
        }
        channels
    }

    #[test]
    fn test_varint_round_trip() {
        for value in [0u64, 1, 127, 128, 300, 16383, 16384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value).unwrap();
            assert_eq!(buf.len(), varint_len(value));
            let mut cursor = Cursor::new(buf);
            assert_eq!(read_varint(&mut cursor).unwrap(), value);
        }
    }

    #[test]
    fn test_varint_encoding_of_300() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 300).unwrap();
        assert_eq!(buf, vec![0xAC, 0x02]);
    }

    #[test]
    fn test_varint_rejects_overlong_input() {
        // Eleven continuation bytes never terminate within 64 bits
        let buf = vec![0x80u8; 11];
        let mut cursor = Cursor::new(buf);
        assert!(read_varint(&mut cursor).is_err());
    }

    #[test]
    fn test_header_round_trip() {
        let mut header = RecordingHeader::new(Protocol::Artnet, 12, 1700000000123);
        header.duration_ms = 60000;
        header.frame_count = 4242;

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN);

        let mut cursor = Cursor::new(buf);
        let read_header = RecordingHeader::read(&mut cursor).unwrap();
        assert_eq!(read_header, header);
    }

    #[test]
    fn test_header_layout() {
        let header = RecordingHeader::new(Protocol::Sacn, 1, 0);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();

        // magic, version 1, delta flag, protocol sACN, universe 1 LE
        assert_eq!(
            &buf[0..9],
            &[0x44, 0x4D, 0x58, 0x52, 0x01, 0x01, 0x00, 0x01, 0x00]
        );
        // reserved tail stays zeroed
        assert!(buf[25..32].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut buf = Vec::new();
        RecordingHeader::new(Protocol::Sacn, 1, 0).write(&mut buf).unwrap();
        buf[0] = b'X';
        let mut cursor = Cursor::new(buf);
        assert!(RecordingHeader::read(&mut cursor).is_err());
    }

    #[test]
    fn test_header_rejects_newer_version() {
        let mut buf = Vec::new();
        RecordingHeader::new(Protocol::Sacn, 1, 0).write(&mut buf).unwrap();
        buf[4] = FORMAT_VERSION + 1;
        let mut cursor = Cursor::new(buf);
        assert!(RecordingHeader::read(&mut cursor).is_err());
    }

    #[test]
    fn test_snapshot_frame_round_trip() {
        let frame = RecordingFrame::Snapshot {
            delta_ms: 300,
            channels: channels_with(&[(0, 1), (511, 255)]),
        };

        let mut buf = Vec::new();
        frame.write(&mut buf).unwrap();
        assert_eq!(buf.len(), frame.encoded_len());
        // varint 300, then the snapshot marker
        assert_eq!(&buf[0..3], &[0xAC, 0x02, SNAPSHOT_MARKER]);

        let mut cursor = Cursor::new(buf);
        assert_eq!(RecordingFrame::read(&mut cursor).unwrap(), frame);
    }

    #[test]
    fn test_delta_frame_round_trip() {
        let frame = RecordingFrame::Delta {
            delta_ms: 25,
            changes: vec![(0, 10), (7, 0), (511, 200)],
        };

        let mut buf = Vec::new();
        frame.write(&mut buf).unwrap();
        assert_eq!(buf.len(), frame.encoded_len());
        // varint 25, inline count 3, then channel 0 LE + value
        assert_eq!(&buf[0..5], &[25, 3, 0, 0, 10]);

        let mut cursor = Cursor::new(buf);
        assert_eq!(RecordingFrame::read(&mut cursor).unwrap(), frame);
    }

    #[test]
    fn test_extended_delta_round_trip() {
        let changes: Vec<(u16, u8)> = (0..300).map(|i| (i as u16, (i % 256) as u8)).collect();
        let frame = RecordingFrame::Delta {
            delta_ms: 40,
            changes,
        };

        let mut buf = Vec::new();
        frame.write(&mut buf).unwrap();
        // 300 does not fit inline: marker plus 16-bit count
        assert_eq!(buf[1], EXTENDED_COUNT_MARKER);
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), 300);
        assert_eq!(buf.len(), frame.encoded_len());

        let mut cursor = Cursor::new(buf);
        assert_eq!(RecordingFrame::read(&mut cursor).unwrap(), frame);
    }

    #[test]
    fn test_frame_rejects_out_of_range_channel() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 10).unwrap();
        buf.push(1); // one change
        buf.extend_from_slice(&512u16.to_le_bytes());
        buf.push(99);

        let mut cursor = Cursor::new(buf);
        assert!(RecordingFrame::read(&mut cursor).is_err());
    }

    #[test]
    fn test_encoder_first_frame_is_snapshot() {
        let mut encoder = FrameEncoder::new();
        let state = channels_with(&[(3, 30)]);

        let frame = encoder.encode(&state, 1000).unwrap();
        match frame {
            RecordingFrame::Snapshot { delta_ms, channels } => {
                assert_eq!(delta_ms, 0);
                assert_eq!(channels[3], 30);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_encoder_skips_unchanged_state() {
        let mut encoder = FrameEncoder::new();
        let state = channels_with(&[(3, 30)]);

        encoder.encode(&state, 1000).unwrap();
        assert!(encoder.encode(&state, 1100).is_none());

        // The skipped state did not advance time: the next delta spans back
        // to the snapshot at t=1000
        let changed = channels_with(&[(3, 31)]);
        match encoder.encode(&changed, 1200).unwrap() {
            RecordingFrame::Delta { delta_ms, changes } => {
                assert_eq!(delta_ms, 200);
                assert_eq!(changes, vec![(3, 31)]);
            }
            other => panic!("expected delta, got {:?}", other),
        }
    }

    #[test]
    fn test_encoder_forces_snapshot_after_interval() {
        let mut encoder = FrameEncoder::new();
        let state = channels_with(&[(3, 30)]);

        encoder.encode(&state, 1000).unwrap();
        // Unchanged, but the snapshot interval has elapsed
        let frame = encoder.encode(&state, 1000 + SNAPSHOT_INTERVAL_MS).unwrap();
        match frame {
            RecordingFrame::Snapshot { delta_ms, .. } => {
                assert_eq!(delta_ms, SNAPSHOT_INTERVAL_MS);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_encoder_reports_all_changes() {
        let mut encoder = FrameEncoder::new();
        encoder.encode(&[0u8; DMX_CHANNELS], 0).unwrap();

        let mut state = [0u8; DMX_CHANNELS];
        for i in 0..300 {
            state[i] = 1;
        }
        match encoder.encode(&state, 50).unwrap() {
            RecordingFrame::Delta { changes, .. } => {
                assert_eq!(changes.len(), 300);
                // ascending channel order
                assert!(changes.windows(2).all(|w| w[0].0 < w[1].0));
            }
            other => panic!("expected delta, got {:?}", other),
        }
    }

    #[test]
    fn test_writer_reader_round_trip() {
        let states: Vec<(u64, [u8; DMX_CHANNELS])> = vec![
            (0, channels_with(&[(0, 100)])),
            (100, channels_with(&[(0, 100), (1, 50)])),
            (250, channels_with(&[(0, 0), (1, 50)])),
            // Past the snapshot interval; forces a mid-stream snapshot
            (6000, channels_with(&[(0, 0), (1, 50)])),
            (6100, channels_with(&[(2, 255)])),
        ];

        let mut encoder = FrameEncoder::new();
        let header = RecordingHeader::new(Protocol::Sacn, 1, 1700000000000);
        let mut writer = RecordingWriter::new(Cursor::new(Vec::new()), header).unwrap();
        for (t, state) in &states[..2] {
            writer.write_frame(&encoder.encode(state, *t).unwrap()).unwrap();
        }
        // Repeating the t=100 state writes nothing and costs zero bytes
        let before = writer.bytes_written();
        assert!(encoder.encode(&states[1].1, 180).is_none());
        assert_eq!(writer.bytes_written(), before);
        for (t, state) in &states[2..] {
            writer.write_frame(&encoder.encode(state, *t).unwrap()).unwrap();
        }
        assert_eq!(writer.frame_count(), 5);
        let buf = writer.finish(6100).unwrap().into_inner();

        let mut reader = RecordingReader::from_bytes(buf).unwrap();
        assert_eq!(reader.header().frame_count, 5);
        assert_eq!(reader.header().duration_ms, 6100);
        assert_eq!(reader.header().universe, 1);

        // Replaying all frames reproduces each recorded state in turn
        let mut channels = [0u8; DMX_CHANNELS];
        for (t, state) in &states {
            let frame = reader.next_frame().unwrap().unwrap();
            frame.apply(&mut channels);
            assert_eq!(reader.position_ms(), *t);
            assert_eq!(&channels, state);
        }
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_seek_reconstructs_state() {
        let states: Vec<(u64, [u8; DMX_CHANNELS])> = vec![
            (0, channels_with(&[(0, 100)])),
            (100, channels_with(&[(0, 100), (1, 50)])),
            (250, channels_with(&[(0, 7), (1, 50)])),
            (6000, channels_with(&[(0, 7), (1, 50), (2, 2)])),
            (6100, channels_with(&[(0, 7), (1, 50), (2, 3)])),
        ];

        let mut encoder = FrameEncoder::new();
        let header = RecordingHeader::new(Protocol::Sacn, 1, 0);
        let mut writer = RecordingWriter::new(Cursor::new(Vec::new()), header).unwrap();
        for (t, state) in &states {
            if let Some(frame) = encoder.encode(state, *t) {
                writer.write_frame(&frame).unwrap();
            }
        }
        let buf = writer.finish(6100).unwrap().into_inner();
        let mut reader = RecordingReader::from_bytes(buf).unwrap();

        // Mid-delta target: state as of t=100, with t=250 still pending
        let mut channels = [0u8; DMX_CHANNELS];
        reader.seek(150, &mut channels).unwrap();
        assert_eq!(channels, states[1].1);

        // Seeking to the same target again lands on the same state
        let mut again = [0u8; DMX_CHANNELS];
        reader.seek(150, &mut again).unwrap();
        assert_eq!(again, channels);

        let next = reader.next_frame().unwrap().unwrap();
        assert_eq!(reader.position_ms(), 250);
        next.apply(&mut channels);
        assert_eq!(channels, states[2].1);

        // Target after the forced snapshot: baseline comes from it, not from
        // replaying the whole file
        let mut channels = [0u8; DMX_CHANNELS];
        reader.seek(6050, &mut channels).unwrap();
        assert_eq!(channels, states[3].1);

        // Target past the end lands on the final state
        let mut channels = [0u8; DMX_CHANNELS];
        reader.seek(1_000_000, &mut channels).unwrap();
        assert_eq!(channels, states[4].1);
        assert!(reader.next_frame().unwrap().is_none());

        // Target zero is the first recorded state
        let mut channels = [0u8; DMX_CHANNELS];
        reader.seek(0, &mut channels).unwrap();
        assert_eq!(channels, states[0].1);
    }

    #[test]
    fn test_reader_open_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.dmxrec");
        std::fs::write(&path, b"DMXR").unwrap();

        let err = RecordingReader::open(&path).unwrap_err();
        assert!(matches!(err, DmxError::FileTooSmall { .. }));
    }

    #[test]
    fn test_reader_open_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreign.dmxrec");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let err = RecordingReader::open(&path).unwrap_err();
        assert!(matches!(err, DmxError::BadMagic { .. }));
    }
}
