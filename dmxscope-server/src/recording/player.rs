//! DMX playback - reads .dmxrec files and re-emits frames onto the event
//! bus with their original timing.
//!
//! Frames are scheduled against an absolute start instant
//! (`start_time + fire_time / speed`) rather than chained sleeps, so timing
//! error never accumulates over a long recording. Pause, resume, seeking and
//! speed changes all rebase that start instant.

use log::{debug, info};
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_graceful_shutdown::SubsystemHandle;

use dmxscope_core::{DmxPacket, Protocol, DMX_CHANNELS};

use crate::error::DmxError;
use crate::events::EventBus;
use crate::transport::now_ms;

use super::file_format::{RecordingFrame, RecordingReader};

const COMMAND_QUEUE_DEPTH: usize = 16;

/// Slowest and fastest supported playback rates
pub const SPEED_MIN: f64 = 0.1;
pub const SPEED_MAX: f64 = 10.0;

/// Playback state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Finished,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Finished => "finished",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the player announces on the event bus
#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackEvent {
    State(PlaybackState),
    Position { position_ms: u64 },
    /// The last frame played and looping is off
    Finished,
}

/// Playback status information
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    /// Current state
    pub state: String,
    /// Loaded filename
    pub filename: String,
    /// Protocol the recording was captured from
    pub protocol: Protocol,
    /// Universe the recording was captured from
    pub universe: u16,
    /// Current position in milliseconds
    pub position_ms: u64,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Total frame count
    pub frame_count: u32,
    /// Playback speed multiplier
    pub speed: f32,
    /// Loop playback
    pub loop_playback: bool,
}

pub enum PlayerCommand {
    Play {
        reply: oneshot::Sender<Result<(), DmxError>>,
    },
    Pause {
        reply: oneshot::Sender<Result<(), DmxError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Seek {
        position_ms: u64,
        reply: oneshot::Sender<Result<(), DmxError>>,
    },
    SetSpeed {
        speed: f64,
        reply: oneshot::Sender<()>,
    },
    SetLoop {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<PlaybackStatus>,
    },
}

/// Cloneable front for a running [`Player`]
#[derive(Clone)]
pub struct PlayerHandle {
    command_tx: mpsc::Sender<PlayerCommand>,
}

impl PlayerHandle {
    /// Start playing: from idle or finished this restarts at the beginning,
    /// from paused it resumes in place
    pub async fn play(&self) -> Result<(), DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(PlayerCommand::Play { reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)?
    }

    pub async fn pause(&self) -> Result<(), DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(PlayerCommand::Pause { reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)?
    }

    /// Return to idle: position zero, all channels dark. Stopping an idle
    /// player does nothing.
    pub async fn stop(&self) -> Result<(), DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(PlayerCommand::Stop { reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)
    }

    pub async fn seek(&self, position_ms: u64) -> Result<(), DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(PlayerCommand::Seek { position_ms, reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)?
    }

    /// Change the playback rate; values outside 0.1x to 10x are clamped
    pub async fn set_speed(&self, speed: f64) -> Result<(), DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(PlayerCommand::SetSpeed { speed, reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)
    }

    pub async fn set_loop(&self, enabled: bool) -> Result<(), DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(PlayerCommand::SetLoop { enabled, reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)
    }

    pub async fn status(&self) -> Result<PlaybackStatus, DmxError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(PlayerCommand::Status { reply })
            .await
            .map_err(|_| DmxError::Shutdown)?;
        reply_rx.await.map_err(|_| DmxError::Shutdown)
    }
}

pub struct Player {
    reader: RecordingReader,
    filename: String,
    bus: EventBus,
    command_rx: mpsc::Receiver<PlayerCommand>,
    state: PlaybackState,
    channels: [u8; DMX_CHANNELS],
    /// Fire time of the last applied frame, ms from recording start
    position_ms: u64,
    speed: f64,
    loop_playback: bool,
    /// Rebased so that `start_time + position / speed` is always "now"
    /// while playing
    start_time: Instant,
    /// Next frame to fire, decoded ahead of its deadline
    pending: Option<RecordingFrame>,
    /// Fire time of the pending frame
    pending_at: u64,
    commands_closed: bool,
}

impl Player {
    /// Load a recording for playback. The player starts idle; playback
    /// begins on the first [`PlayerHandle::play`].
    pub fn load(path: &Path, bus: EventBus) -> Result<(Player, PlayerHandle), DmxError> {
        info!("Loading recording: {}", path.display());
        let reader = RecordingReader::open(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::from_reader(reader, filename, bus))
    }

    fn from_reader(
        reader: RecordingReader,
        filename: String,
        bus: EventBus,
    ) -> (Player, PlayerHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let player = Player {
            reader,
            filename,
            bus,
            command_rx,
            state: PlaybackState::Idle,
            channels: [0; DMX_CHANNELS],
            position_ms: 0,
            speed: 1.0,
            loop_playback: false,
            start_time: Instant::now(),
            pending: None,
            pending_at: 0,
            commands_closed: false,
        };
        (player, PlayerHandle { command_tx })
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), DmxError> {
        debug!(
            "Playback task started for '{}': {} frames, {}ms",
            self.filename,
            self.reader.header().frame_count,
            self.reader.header().duration_ms
        );

        loop {
            if self.state == PlaybackState::Playing && self.pending.is_none() {
                self.refill_pending().map_err(DmxError::Io)?;
                continue;
            }

            let deadline = if self.state == PlaybackState::Playing && self.pending.is_some() {
                Some(self.start_time + self.playback_offset(self.pending_at))
            } else {
                None
            };

            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    return Ok(());
                },
                r = self.command_rx.recv(), if !self.commands_closed => {
                    match r {
                        Some(command) => {
                            self.handle_command(command);
                        }
                        None => {
                            // All handles dropped; playback continues on its own
                            debug!("Player command channel closed");
                            self.commands_closed = true;
                        }
                    }
                },
                _ = tokio::time::sleep_until(
                    deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(60))
                ), if deadline.is_some() => {
                    self.fire_pending();
                },
            }
        }
    }

    /// Wall-clock offset of a recording position at the current speed
    fn playback_offset(&self, position_ms: u64) -> Duration {
        Duration::from_secs_f64(position_ms as f64 / self.speed / 1000.0)
    }

    /// Move `start_time` so the current position maps to "now"
    fn rebase(&mut self) {
        let offset = self.playback_offset(self.position_ms);
        self.start_time = Instant::now().checked_sub(offset).unwrap_or_else(Instant::now);
    }

    /// Decode the next frame while playing. At the end of the recording this
    /// either rewinds (loop mode) or transitions to finished.
    fn refill_pending(&mut self) -> io::Result<()> {
        if self.state != PlaybackState::Playing || self.pending.is_some() {
            return Ok(());
        }
        match self.reader.next_frame()? {
            Some(frame) => {
                self.pending_at = self.reader.position_ms();
                self.pending = Some(frame);
            }
            None => {
                if self.loop_playback && self.reader.header().frame_count > 0 {
                    debug!("Looping '{}'", self.filename);
                    self.reader.rewind();
                    self.position_ms = 0;
                    self.start_time = Instant::now();
                    self.bus
                        .publish_playback(PlaybackEvent::Position { position_ms: 0 });
                } else {
                    info!("Playback of '{}' finished", self.filename);
                    self.state = PlaybackState::Finished;
                    self.bus
                        .publish_playback(PlaybackEvent::State(PlaybackState::Finished));
                    self.bus.publish_playback(PlaybackEvent::Finished);
                }
            }
        }
        Ok(())
    }

    /// Apply the pending frame and emit the resulting channel state
    fn fire_pending(&mut self) {
        let Some(frame) = self.pending.take() else {
            return;
        };
        frame.apply(&mut self.channels);
        self.position_ms = self.pending_at;
        self.publish_channels();
        self.bus.publish_playback(PlaybackEvent::Position {
            position_ms: self.position_ms,
        });
    }

    fn publish_channels(&self) {
        self.bus.publish_dmx(DmxPacket {
            universe: self.reader.header().universe,
            channels: self.channels,
            source: Some(self.filename.clone()),
            priority: None,
            sequence: None,
            timestamp: now_ms(),
        });
    }

    fn handle_command(&mut self, command: PlayerCommand) {
        match command {
            PlayerCommand::Play { reply } => {
                let _ = reply.send(self.play());
            }
            PlayerCommand::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            PlayerCommand::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
            PlayerCommand::Seek { position_ms, reply } => {
                let _ = reply.send(self.seek(position_ms));
            }
            PlayerCommand::SetSpeed { speed, reply } => {
                self.set_speed(speed);
                let _ = reply.send(());
            }
            PlayerCommand::SetLoop { enabled, reply } => {
                self.loop_playback = enabled;
                let _ = reply.send(());
            }
            PlayerCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn play(&mut self) -> Result<(), DmxError> {
        match self.state {
            PlaybackState::Playing => Ok(()),
            PlaybackState::Paused => {
                self.state = PlaybackState::Playing;
                self.rebase();
                self.bus
                    .publish_playback(PlaybackEvent::State(PlaybackState::Playing));
                Ok(())
            }
            PlaybackState::Idle | PlaybackState::Finished => {
                self.reader.rewind();
                self.channels = [0; DMX_CHANNELS];
                self.position_ms = 0;
                self.pending = None;
                self.start_time = Instant::now();
                self.state = PlaybackState::Playing;
                self.bus
                    .publish_playback(PlaybackEvent::State(PlaybackState::Playing));
                Ok(())
            }
        }
    }

    fn pause(&mut self) -> Result<(), DmxError> {
        if self.state != PlaybackState::Playing {
            return Err(DmxError::WrongState {
                operation: "pause playback",
                state: self.state.as_str(),
            });
        }
        self.state = PlaybackState::Paused;
        self.bus
            .publish_playback(PlaybackEvent::State(PlaybackState::Paused));
        Ok(())
    }

    fn stop(&mut self) {
        if self.state == PlaybackState::Idle {
            return;
        }
        self.state = PlaybackState::Idle;
        self.reader.rewind();
        self.pending = None;
        self.position_ms = 0;
        self.channels = [0; DMX_CHANNELS];
        // Blackout so downstream views do not hold the last frame
        self.publish_channels();
        self.bus
            .publish_playback(PlaybackEvent::State(PlaybackState::Idle));
    }

    fn seek(&mut self, target_ms: u64) -> Result<(), DmxError> {
        match self.state {
            PlaybackState::Playing | PlaybackState::Paused => {
                let target = target_ms.min(self.reader.header().duration_ms as u64);
                self.reader
                    .seek(target, &mut self.channels)
                    .map_err(DmxError::Io)?;
                self.pending = None;
                self.position_ms = target;
                if self.state == PlaybackState::Playing {
                    self.rebase();
                }
                // Show the reconstructed state right away
                self.publish_channels();
                self.bus
                    .publish_playback(PlaybackEvent::Position { position_ms: target });
                Ok(())
            }
            state => Err(DmxError::WrongState {
                operation: "seek",
                state: state.as_str(),
            }),
        }
    }

    fn set_speed(&mut self, speed: f64) {
        self.speed = speed.clamp(SPEED_MIN, SPEED_MAX);
        if self.state == PlaybackState::Playing {
            self.rebase();
        }
        debug!("Playback speed set to {}x", self.speed);
    }

    fn status(&self) -> PlaybackStatus {
        let header = self.reader.header();
        PlaybackStatus {
            state: self.state.to_string(),
            filename: self.filename.clone(),
            protocol: header.protocol,
            universe: header.universe,
            position_ms: self.position_ms,
            duration_ms: header.duration_ms as u64,
            frame_count: header.frame_count,
            speed: self.speed as f32,
            loop_playback: self.loop_playback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::file_format::{FrameEncoder, RecordingHeader, RecordingWriter};
    use std::io::Cursor;

    /// Three-frame recording on universe 1: t=0 ch0=10, t=100 ch1=20,
    /// t=200 ch0=0
    fn test_recording() -> RecordingReader {
        let mut states = Vec::new();
        let mut state = [0u8; DMX_CHANNELS];
        state[0] = 10;
        states.push((0u64, state));
        state[1] = 20;
        states.push((100, state));
        state[0] = 0;
        states.push((200, state));

        let mut encoder = FrameEncoder::new();
        let header = RecordingHeader::new(Protocol::Sacn, 1, 0);
        let mut writer = RecordingWriter::new(Cursor::new(Vec::new()), header).unwrap();
        for (t, s) in &states {
            writer.write_frame(&encoder.encode(s, *t).unwrap()).unwrap();
        }
        let buf = writer.finish(200).unwrap().into_inner();
        RecordingReader::from_bytes(buf).unwrap()
    }

    fn test_player() -> (Player, PlayerHandle) {
        Player::from_reader(test_recording(), "test.dmxrec".to_string(), EventBus::new())
    }

    #[tokio::test]
    async fn test_pause_while_idle_is_wrong_state() {
        let (mut player, _handle) = test_player();
        let err = player.pause().unwrap_err();
        assert!(matches!(
            err,
            DmxError::WrongState {
                operation: "pause playback",
                state: "idle",
            }
        ));
    }

    #[tokio::test]
    async fn test_play_fires_frames_in_order() {
        let (mut player, _handle) = test_player();
        let mut dmx_rx = player.bus.subscribe_dmx();

        player.play().unwrap();
        assert_eq!(player.state, PlaybackState::Playing);

        // First frame: snapshot at t=0
        player.refill_pending().unwrap();
        assert_eq!(player.pending_at, 0);
        player.fire_pending();
        assert_eq!(player.position_ms, 0);
        assert_eq!(dmx_rx.recv().await.unwrap().channels[0], 10);

        // Second frame: delta at t=100
        player.refill_pending().unwrap();
        assert_eq!(player.pending_at, 100);
        player.fire_pending();
        let packet = dmx_rx.recv().await.unwrap();
        assert_eq!(packet.channels[0], 10);
        assert_eq!(packet.channels[1], 20);
        assert_eq!(packet.source.as_deref(), Some("test.dmxrec"));

        // Third frame, then the recording is done
        player.refill_pending().unwrap();
        player.fire_pending();
        assert_eq!(player.position_ms, 200);

        player.refill_pending().unwrap();
        assert_eq!(player.state, PlaybackState::Finished);
    }

    #[tokio::test]
    async fn test_finished_is_announced() {
        let (mut player, _handle) = test_player();
        let mut events = player.bus.subscribe_playback();

        player.play().unwrap();
        for _ in 0..3 {
            player.refill_pending().unwrap();
            player.fire_pending();
        }
        player.refill_pending().unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            PlaybackEvent::State(PlaybackState::Playing)
        );
        // Position events for the three frames
        for expected in [0u64, 100, 200] {
            assert_eq!(
                events.recv().await.unwrap(),
                PlaybackEvent::Position {
                    position_ms: expected
                }
            );
        }
        assert_eq!(
            events.recv().await.unwrap(),
            PlaybackEvent::State(PlaybackState::Finished)
        );
        assert_eq!(events.recv().await.unwrap(), PlaybackEvent::Finished);
    }

    #[tokio::test]
    async fn test_loop_rewinds_instead_of_finishing() {
        let (mut player, _handle) = test_player();
        player.loop_playback = true;

        player.play().unwrap();
        for _ in 0..3 {
            player.refill_pending().unwrap();
            player.fire_pending();
        }

        // End of file: rewinds and decodes the first frame again
        player.refill_pending().unwrap();
        assert_eq!(player.state, PlaybackState::Playing);
        assert_eq!(player.position_ms, 0);
        player.refill_pending().unwrap();
        assert_eq!(player.pending_at, 0);
        assert!(player.pending.is_some());
    }

    #[tokio::test]
    async fn test_seek_while_paused_reconstructs_state() {
        let (mut player, _handle) = test_player();

        player.play().unwrap();
        player.pause().unwrap();
        player.seek(150).unwrap();

        // State as of t=100; the t=200 frame is still ahead
        assert_eq!(player.position_ms, 150);
        assert_eq!(player.channels[0], 10);
        assert_eq!(player.channels[1], 20);

        player.play().unwrap();
        player.refill_pending().unwrap();
        assert_eq!(player.pending_at, 200);
    }

    #[tokio::test]
    async fn test_seek_clamps_to_duration() {
        let (mut player, _handle) = test_player();
        player.play().unwrap();
        player.seek(5000).unwrap();
        assert_eq!(player.position_ms, 200);
    }

    #[tokio::test]
    async fn test_seek_while_idle_is_wrong_state() {
        let (mut player, _handle) = test_player();
        assert!(player.seek(100).is_err());
    }

    #[tokio::test]
    async fn test_stop_blacks_out_and_resets() {
        let (mut player, _handle) = test_player();
        let mut dmx_rx = player.bus.subscribe_dmx();

        player.play().unwrap();
        player.refill_pending().unwrap();
        player.fire_pending();
        let _ = dmx_rx.recv().await.unwrap();

        player.stop();
        assert_eq!(player.state, PlaybackState::Idle);
        assert_eq!(player.position_ms, 0);
        let blackout = dmx_rx.recv().await.unwrap();
        assert!(blackout.channels.iter().all(|&v| v == 0));

        // Stopping again changes nothing and sends nothing
        player.stop();
        assert!(dmx_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_play_after_finish_restarts() {
        let (mut player, _handle) = test_player();
        player.play().unwrap();
        for _ in 0..3 {
            player.refill_pending().unwrap();
            player.fire_pending();
        }
        player.refill_pending().unwrap();
        assert_eq!(player.state, PlaybackState::Finished);

        player.play().unwrap();
        assert_eq!(player.state, PlaybackState::Playing);
        assert_eq!(player.position_ms, 0);
        player.refill_pending().unwrap();
        assert_eq!(player.pending_at, 0);
    }

    #[tokio::test]
    async fn test_speed_is_clamped() {
        let (mut player, _handle) = test_player();
        player.set_speed(50.0);
        assert_eq!(player.speed, SPEED_MAX);
        player.set_speed(0.0);
        assert_eq!(player.speed, SPEED_MIN);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let (player, _handle) = test_player();
        let json = serde_json::to_value(player.status()).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["durationMs"], 200);
        assert_eq!(json["frameCount"], 3);
        assert_eq!(json["loopPlayback"], false);
    }
}
