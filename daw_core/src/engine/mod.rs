// src/engine/mod.rs

pub mod channel;
pub mod clip;
pub mod events;
pub mod mixer;
pub mod output;
pub mod time;
pub mod track;

pub use channel::{Channel, ChannelId};
pub use clip::{AudioClip, ClipId, LoadOutcome, LoadStatus, PendingLoad, PlaybackStatus};
pub use events::EngineEvent;
pub use mixer::{MasterBus, Mixer};
pub use time::{db_to_gain, gain_to_db, SampleClock, StreamFormat, MAX_OFFSET_FRAMES};
pub use track::{AttachError, Track, TrackControls, TrackId};

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use ringbuf::traits::Consumer;
use ringbuf::HeapCons;
use serde::Serialize;

use crate::decoder::{ClipSourceProvider, SourceRef};
use crate::error::{EngineError, Result};
use mixer::{MixerCmd, Retired};

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub channels: usize,
    /// Added to the clock when `play()` fixes its time zero.
    pub lookahead: Duration,
    /// Clips and channels the mixer preallocates room for. Also the number
    /// of slots in the queue released buffers come back through.
    pub render_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            lookahead: Duration::ZERO,
            render_capacity: 256,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransportState {
    Stopped,
    Running { time_zero: u64 },
}

#[derive(Clone, Debug, Serialize)]
pub struct ClipSnapshot {
    pub id: ClipId,
    pub name: String,
    pub start_time: f64,
    pub duration: f64,
    pub loaded: bool,
    pub playback: PlaybackStatus,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub name: String,
    pub volume: f32,
    pub muted: bool,
    pub pan: f32,
    pub clips: Vec<ClipSnapshot>,
}

/// Read model handed to the UI.
#[derive(Clone, Debug, Serialize)]
pub struct TransportSnapshot {
    pub state: TransportState,
    pub position: f64,
    pub master_gain: f32,
    pub tracks: Vec<TrackSnapshot>,
}

/// Owns the tracks and drives global play/stop against one sample clock.
///
/// Every cue is expressed as an absolute frame on the mixer's clock, so
/// clips with the same start time on different tracks begin on the same
/// frame regardless of when their commands arrive.
pub struct Transport {
    bus: MasterBus,
    tracks: Vec<Track>,
    next_track_id: u32,
    state: TransportState,
    lookahead_frames: u64,
    graveyard: HeapCons<Retired>,
}

impl Transport {
    /// Builds the master bus. The returned `Mixer` is the render side and
    /// goes to the output stream (or to a test driving it by hand).
    pub fn new(config: EngineConfig) -> (Self, Mixer) {
        let format = StreamFormat {
            sample_rate: config.sample_rate.max(1),
            channels: config.channels.max(1),
        };
        let (bus, mixer, graveyard) = mixer::master_bus(format, config.render_capacity);
        let lookahead_frames = format.duration_to_frames(config.lookahead);
        log::info!(
            "transport ready: {} Hz, {} ch, lookahead {lookahead_frames} frames",
            format.sample_rate,
            format.channels
        );
        let transport = Self {
            bus,
            tracks: Vec::new(),
            next_track_id: 1,
            state: TransportState::Stopped,
            lookahead_frames,
            graveyard,
        };
        (transport, mixer)
    }

    pub fn bus(&self) -> &MasterBus {
        &self.bus
    }

    pub fn format(&self) -> StreamFormat {
        self.bus.format()
    }

    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, TransportState::Running { .. })
    }

    fn time_zero(&self) -> Option<u64> {
        match self.state {
            TransportState::Running { time_zero } => Some(time_zero),
            TransportState::Stopped => None,
        }
    }

    /// Seconds since time zero; 0 when stopped or still inside the lookahead.
    pub fn position(&self) -> f64 {
        match self.state {
            TransportState::Running { time_zero } => {
                let now = self.bus.clock().now();
                self.format().frames_to_secs(now.saturating_sub(time_zero))
            }
            TransportState::Stopped => 0.0,
        }
    }

    pub fn master_gain(&self) -> f32 {
        self.bus.master_gain()
    }

    pub fn set_master_gain(&mut self, gain: f32) -> Result<()> {
        if !(0.0..=2.0).contains(&gain) {
            return Err(EngineError::InvalidArgument { what: "master gain", value: gain as f64 });
        }
        self.bus.set_master_gain(gain);
        Ok(())
    }

    // --- Tracks ---

    pub fn add_track(&mut self, name: impl Into<String>) -> TrackId {
        let id = TrackId(self.next_track_id);
        self.next_track_id += 1;
        let track = Track::new(id, name.into(), &self.bus);
        log::info!("{id} '{}' added", track.name());
        self.bus.emit(EngineEvent::TrackAdded { track: id, name: track.name().to_owned() });
        self.tracks.push(track);
        id
    }

    /// Disposes the track and returns its detached clips.
    pub fn remove_track(&mut self, id: TrackId) -> Result<Vec<AudioClip>> {
        let index = self.track_index(id).ok_or(EngineError::TrackNotFound(id))?;
        let clips = self.tracks[index].dispose()?;
        self.tracks.remove(index);
        self.bus.emit(EngineEvent::TrackRemoved { track: id });
        Ok(clips)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == id)
    }

    /// Volume, mute, pan and name of one track. Clips are attached with
    /// `add_clip` instead.
    pub fn track_mut(&mut self, id: TrackId) -> Option<TrackControls<'_>> {
        self.tracks.iter_mut().find(|t| t.id() == id).map(TrackControls::new)
    }

    fn track_index(&self, id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|t| t.id() == id)
    }

    fn owner_index(&self, clip: ClipId) -> Option<usize> {
        self.tracks.iter().position(|t| t.contains(clip))
    }

    // --- Clips ---

    /// A detached clip on this transport's bus, ready for `add_clip`.
    pub fn create_clip(&self, name: Option<String>, source: SourceRef) -> AudioClip {
        AudioClip::new(name, source, &self.bus)
    }

    pub fn clip(&self, id: ClipId) -> Option<&AudioClip> {
        self.tracks.iter().find_map(|t| t.clip(id))
    }

    fn clip_mut(&mut self, id: ClipId) -> Option<&mut AudioClip> {
        self.tracks.iter_mut().find_map(|t| t.clip_mut(id))
    }

    fn cue_frame(&self, start_time: f64) -> Option<u64> {
        let offset = self.format().secs_to_frames(start_time);
        self.time_zero().map(|tz| tz.saturating_add(offset))
    }

    /// Attaches a clip to a track. While running, a loaded clip is cued
    /// against the current time zero straight away.
    pub fn add_clip(&mut self, track: TrackId, clip: AudioClip) -> Result<ClipId, AttachError> {
        let cue = self.cue_frame(clip.start_time());
        let Some(target) = self.tracks.iter_mut().find(|t| t.id() == track) else {
            return Err(AttachError { error: EngineError::TrackNotFound(track), clip });
        };
        let id = target.add_audio_clip(clip)?;
        if let (Some(at), Some(clip)) = (cue, target.clip_mut(id)) {
            if clip.is_playable() {
                match clip.cue_at(at) {
                    Ok(()) => log::debug!("{id} attached while running, cued at frame {at}"),
                    Err(e) => log::warn!("{id} attached but not cued: {e}"),
                }
            }
        }
        Ok(id)
    }

    /// Detaches a clip from whichever track holds it.
    pub fn remove_clip(&mut self, clip: ClipId) -> Option<AudioClip> {
        let index = self.owner_index(clip)?;
        self.tracks[index].remove_audio_clip(clip)
    }

    /// Moves a clip to another track. On failure the clip stays where it was.
    pub fn move_clip(&mut self, clip: ClipId, to: TrackId) -> Result<()> {
        let to_index = self.track_index(to).ok_or(EngineError::TrackNotFound(to))?;
        let from_index = self.owner_index(clip).ok_or(EngineError::ClipNotFound(clip))?;
        if from_index == to_index {
            return Ok(());
        }
        let from = self.tracks[from_index].id();
        let detached = self.tracks[from_index]
            .remove_audio_clip(clip)
            .ok_or(EngineError::ClipNotFound(clip))?;
        match self.add_clip(to, detached) {
            Ok(_) => {
                log::debug!("{clip} moved from {from} to {to}");
                Ok(())
            }
            Err(AttachError { error, clip: rejected }) => {
                if let Err(again) = self.add_clip(from, rejected) {
                    log::warn!("{clip} could not be returned to {from}: {}", again.error);
                }
                Err(error)
            }
        }
    }

    /// Updates a clip's offset and, while running, re-cues it.
    pub fn set_clip_start_time(&mut self, clip: ClipId, secs: f64) -> Result<()> {
        let cue = self.cue_frame(secs);
        let target = self.clip_mut(clip).ok_or(EngineError::ClipNotFound(clip))?;
        target.set_start_time(secs)?;
        if let Some(at) = cue {
            if target.is_playable() {
                target.cue_at(at)?;
            }
        }
        Ok(())
    }

    /// Auditions a single clip from the current frame.
    pub fn play_clip(&mut self, clip: ClipId) -> Result<()> {
        self.clip_mut(clip).ok_or(EngineError::ClipNotFound(clip))?.play()
    }

    pub fn stop_clip(&mut self, clip: ClipId) -> Result<()> {
        self.clip_mut(clip).ok_or(EngineError::ClipNotFound(clip))?.stop()
    }

    /// Detaches and disposes a clip.
    pub fn dispose_clip(&mut self, clip: ClipId) -> Result<()> {
        let mut detached = self.remove_clip(clip).ok_or(EngineError::ClipNotFound(clip))?;
        detached.dispose()
    }

    pub fn begin_load<P: ClipSourceProvider>(
        &mut self,
        clip: ClipId,
        source: SourceRef,
        provider: Arc<P>,
    ) -> Result<PendingLoad> {
        self.clip_mut(clip)
            .ok_or(EngineError::ClipNotFound(clip))?
            .begin_load(source, provider)
    }

    /// Installs a finished decode. If the transport is running the clip is
    /// cued against the existing time zero, so a late load starts mid-clip.
    pub fn finish_load(&mut self, outcome: LoadOutcome) -> Result<f64> {
        self.collect_garbage();
        let id = outcome.clip();
        let time_zero = self.time_zero();
        let format = self.format();
        let target = self.clip_mut(id).ok_or(EngineError::ClipNotFound(id))?;
        let duration = target.finish_load(outcome)?;
        if let Some(tz) = time_zero {
            let at = tz.saturating_add(format.secs_to_frames(target.start_time()));
            target.cue_at(at)?;
            log::debug!("{id} loaded while running, cued at frame {at}");
        }
        Ok(duration)
    }

    // --- Transport ---

    /// Cues every loaded clip at `time_zero + start_time` in one batch.
    /// Calling it while running restarts from a fresh time zero.
    pub fn play(&mut self) {
        self.collect_garbage();
        let time_zero = self.bus.clock().now().saturating_add(self.lookahead_frames);
        let format = self.format();

        let mut batch = Vec::new();
        let mut skipped = 0usize;
        for track in &mut self.tracks {
            for clip in track.clips_mut() {
                if let Some(halt) = clip.take_cue() {
                    batch.push(halt);
                }
                if !clip.is_playable() {
                    skipped += 1;
                    continue;
                }
                let at = time_zero.saturating_add(format.secs_to_frames(clip.start_time()));
                match clip.prepare_cue(at) {
                    Ok(cue) => batch.push(cue),
                    Err(e) => log::warn!("{} not cued: {e}", clip.id()),
                }
            }
        }

        log::info!("transport running from frame {time_zero} ({} commands, {skipped} unloaded clips skipped)", batch.len());
        self.bus.send(MixerCmd::Batch(batch));
        self.state = TransportState::Running { time_zero };
        self.bus.emit(EngineEvent::TransportStarted { time_zero });
    }

    /// Halts every clip in one batch and rewinds to zero. Safe when stopped.
    pub fn stop(&mut self) {
        let batch: Vec<MixerCmd> = self
            .tracks
            .iter_mut()
            .flat_map(|t| t.clips_mut())
            .filter_map(|c| c.take_cue())
            .collect();
        if !batch.is_empty() {
            self.bus.send(MixerCmd::Batch(batch));
        }
        if self.is_running() {
            log::info!("transport stopped at {:.3}s", self.position());
            self.state = TransportState::Stopped;
            self.bus.emit(EngineEvent::TransportStopped);
        }
        self.collect_garbage();
    }

    /// Drops buffers the mixer has released. Returns how many were freed.
    pub fn collect_garbage(&mut self) -> usize {
        let mut freed = 0;
        while let Some(item) = self.graveyard.try_pop() {
            drop(item);
            freed += 1;
        }
        if freed > 0 {
            log::debug!("collected {freed} retired buffers");
        }
        freed
    }

    /// End of the last clip on the timeline, in seconds.
    pub fn timeline_length(&self) -> f64 {
        self.tracks
            .iter()
            .flat_map(|t| t.clips())
            .map(|c| c.start_time() + c.duration())
            .fold(0.0, f64::max)
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        let now = self.bus.clock().now();
        let tracks = self
            .tracks
            .iter()
            .map(|t| TrackSnapshot {
                id: t.id(),
                name: t.name().to_owned(),
                volume: t.volume(),
                muted: t.is_muted(),
                pan: t.pan(),
                clips: t
                    .clips()
                    .iter()
                    .map(|c| ClipSnapshot {
                        id: c.id(),
                        name: c.name().to_owned(),
                        start_time: c.start_time(),
                        duration: c.duration(),
                        loaded: c.status() == &LoadStatus::Loaded,
                        playback: c.playback_status_at(now),
                    })
                    .collect(),
            })
            .collect();
        TransportSnapshot {
            state: self.state,
            position: self.position(),
            master_gain: self.master_gain(),
            tracks,
        }
    }
}
