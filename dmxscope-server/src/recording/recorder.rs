//! DMX recorder - subscribes to the packet broadcast and writes a .dmxrec
//! file for one universe.

use log::{debug, error, info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use dmxscope_core::{DmxPacket, Protocol};

use crate::error::DmxError;
use crate::events::EventBus;

use super::file_format::{FrameEncoder, RecordingHeader, RecordingWriter};

/// Recording status information
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    /// Current state: "idle" or "recording"
    pub state: String,
    /// Protocol being recorded (if any)
    pub protocol: Option<Protocol>,
    /// Universe being recorded (if any)
    pub universe: Option<u16>,
    /// Filename being written (if any)
    pub filename: Option<String>,
    /// Number of frames written
    pub frame_count: u32,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// File size in bytes
    pub size_bytes: u64,
    /// Recording start time (Unix timestamp ms)
    pub start_time_ms: Option<u64>,
}

impl Default for RecordingStatus {
    fn default() -> Self {
        Self {
            state: "idle".to_string(),
            protocol: None,
            universe: None,
            filename: None,
            frame_count: 0,
            duration_ms: 0,
            size_bytes: 0,
            start_time_ms: None,
        }
    }
}

/// Active recording handle
pub struct ActiveRecording {
    /// Stop flag
    stop_flag: Arc<AtomicBool>,
    protocol: Protocol,
    universe: u16,
    /// Filename being written
    filename: String,
    /// Frame count (updated by the recording task)
    frame_count: Arc<AtomicU32>,
    /// Duration in ms (updated by the recording task)
    duration_ms: Arc<AtomicU64>,
    /// Bytes written so far
    size_bytes: Arc<AtomicU64>,
    /// Start time
    start_time_ms: u64,
    task: JoinHandle<()>,
}

impl ActiveRecording {
    /// Signal the recording to stop
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Check if the recording task is still running
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Get current status
    pub fn status(&self) -> RecordingStatus {
        RecordingStatus {
            state: "recording".to_string(),
            protocol: Some(self.protocol),
            universe: Some(self.universe),
            filename: Some(self.filename.clone()),
            frame_count: self.frame_count.load(Ordering::Relaxed),
            duration_ms: self.duration_ms.load(Ordering::Relaxed),
            size_bytes: self.size_bytes.load(Ordering::Relaxed),
            start_time_ms: Some(self.start_time_ms),
        }
    }

    /// Stop the recording and wait until the file is finalized on disk
    pub async fn finish(self) -> RecordingStatus {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.task.await {
            error!("Recording task failed: {}", e);
        }
        RecordingStatus {
            state: "idle".to_string(),
            protocol: Some(self.protocol),
            universe: Some(self.universe),
            filename: Some(self.filename.clone()),
            frame_count: self.frame_count.load(Ordering::Relaxed),
            duration_ms: self.duration_ms.load(Ordering::Relaxed),
            size_bytes: self.size_bytes.load(Ordering::Relaxed),
            start_time_ms: Some(self.start_time_ms),
        }
    }
}

/// Owns at most one active recording and enforces the start/stop lifecycle
pub struct Recorder {
    bus: EventBus,
    active: Option<ActiveRecording>,
}

impl Recorder {
    pub fn new(bus: EventBus) -> Self {
        Recorder { bus, active: None }
    }

    /// Begin recording `universe` to `path`. Fails while another recording
    /// is running.
    pub fn start(
        &mut self,
        protocol: Protocol,
        universe: u16,
        path: &Path,
    ) -> Result<(), DmxError> {
        if let Some(active) = &self.active {
            if active.is_running() {
                return Err(DmxError::WrongState {
                    operation: "start recording",
                    state: "recording",
                });
            }
        }
        self.active = Some(start_recording(&self.bus, protocol, universe, path)?);
        Ok(())
    }

    /// Stop the running recording and return its final status
    pub async fn stop(&mut self) -> Result<RecordingStatus, DmxError> {
        match self.active.take() {
            Some(active) => Ok(active.finish().await),
            None => Err(DmxError::WrongState {
                operation: "stop recording",
                state: "idle",
            }),
        }
    }

    pub fn status(&self) -> RecordingStatus {
        match &self.active {
            Some(active) if active.is_running() => active.status(),
            _ => RecordingStatus::default(),
        }
    }
}

/// Start recording a universe from the packet broadcast
pub fn start_recording(
    bus: &EventBus,
    protocol: Protocol,
    universe: u16,
    path: &Path,
) -> Result<ActiveRecording, DmxError> {
    info!("Starting recording to: {}", path.display());

    let file = File::create(path)?;
    let start_time = chrono::Utc::now().timestamp_millis();
    let writer = RecordingWriter::new(file, RecordingHeader::new(protocol, universe, start_time))?;

    let stop_flag = Arc::new(AtomicBool::new(false));
    let frame_count = Arc::new(AtomicU32::new(0));
    let duration_ms = Arc::new(AtomicU64::new(0));
    let size_bytes = Arc::new(AtomicU64::new(0));

    // Subscribe before spawning so no packet published after this call is
    // missed
    let packet_rx = bus.subscribe_dmx();

    let task = {
        let stop_flag = stop_flag.clone();
        let frame_count = frame_count.clone();
        let duration_ms = duration_ms.clone();
        let size_bytes = size_bytes.clone();
        let path = path.to_path_buf();
        tokio::spawn(async move {
            recording_task(
                writer,
                packet_rx,
                universe,
                stop_flag,
                frame_count,
                duration_ms,
                size_bytes,
                path,
            )
            .await;
        })
    };

    Ok(ActiveRecording {
        stop_flag,
        protocol,
        universe,
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        frame_count,
        duration_ms,
        size_bytes,
        start_time_ms: start_time as u64,
        task,
    })
}

/// Recording task that runs in the background
async fn recording_task(
    mut writer: RecordingWriter<File>,
    mut packet_rx: broadcast::Receiver<DmxPacket>,
    universe: u16,
    stop_flag: Arc<AtomicBool>,
    frame_count: Arc<AtomicU32>,
    duration_ms: Arc<AtomicU64>,
    size_bytes: Arc<AtomicU64>,
    path: PathBuf,
) {
    let start = std::time::Instant::now();
    let mut encoder = FrameEncoder::new();
    let mut frames = 0u32;

    debug!("Recording task started for {}", path.display());

    loop {
        if stop_flag.load(Ordering::SeqCst) {
            debug!("Recording stop flag detected");
            break;
        }

        // Use a timeout to periodically check the stop flag
        let result = tokio::time::timeout(Duration::from_millis(100), packet_rx.recv()).await;

        match result {
            Ok(Ok(packet)) => {
                if packet.universe != universe {
                    continue;
                }
                let Some(frame) = encoder.encode(&packet.channels, packet.timestamp) else {
                    // Nothing changed since the last written frame
                    continue;
                };

                if let Err(e) = writer.write_frame(&frame) {
                    error!("Failed to write frame: {}", e);
                    break;
                }
                frames += 1;

                // Update shared counters (not every frame to reduce overhead)
                if frames % 10 == 0 {
                    frame_count.store(frames, Ordering::Relaxed);
                    duration_ms.store(start.elapsed().as_millis() as u64, Ordering::Relaxed);
                    size_bytes.store(writer.bytes_written(), Ordering::Relaxed);
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                warn!("Recording lagged, missed {} packets", n);
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                info!("Packet channel closed");
                break;
            }
            Err(_) => {
                // Timeout - just continue and check the stop flag
            }
        }
    }

    // Update final counters
    let final_duration = start.elapsed().as_millis() as u64;
    let bytes = writer.bytes_written();
    frame_count.store(frames, Ordering::Relaxed);
    duration_ms.store(final_duration, Ordering::Relaxed);
    size_bytes.store(bytes, Ordering::Relaxed);

    // Rewrite the header and force the file to disk
    match writer.finish(final_duration.min(u32::MAX as u64) as u32) {
        Ok(file) => {
            if let Err(e) = file.sync_all() {
                error!("Failed to sync {}: {}", path.display(), e);
            }
            info!(
                "Recording finished: {} frames, {}ms duration, {} bytes",
                frames, final_duration, bytes
            );
        }
        Err(e) => {
            error!("Failed to finish recording: {}", e);
        }
    }

    stop_flag.store(true, Ordering::SeqCst);
}
