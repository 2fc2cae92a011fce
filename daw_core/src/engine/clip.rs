// src/engine/clip.rs

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::channel::{Channel, ChannelId};
use super::events::EngineEvent;
use super::mixer::{MasterBus, MixerCmd, Route};
use super::time::StreamFormat;
use super::track::TrackId;
use crate::decoder::{CancelFlag, ClipSourceProvider, DecodedAudio, SourceRef};
use crate::error::{DecodeError, EngineError, ObjectRef, Result};

/// Identifier for a clip, unique per master bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClipId(pub u32);

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip #{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoadStatus {
    Pending,
    Loaded,
    Failed(DecodeError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    /// No cue.
    Idle,
    /// Cued at a frame the clock has not reached yet.
    Scheduled,
    Playing,
    /// The cue ran past the end of the audio.
    Finished,
}

/// A decode running on the blocking pool.
pub struct PendingLoad {
    clip: ClipId,
    cancel: CancelFlag,
    task: JoinHandle<std::result::Result<DecodedAudio, DecodeError>>,
}

impl PendingLoad {
    fn spawn<P: ClipSourceProvider>(
        handle: &Handle,
        clip: ClipId,
        source: SourceRef,
        provider: Arc<P>,
        format: StreamFormat,
    ) -> Self {
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        let task = handle.spawn_blocking(move || {
            let audio = provider.decode(&source, &flag)?;
            if flag.is_cancelled() {
                return Err(DecodeError::Cancelled);
            }
            audio.conform(format)
        });
        Self { clip, cancel, task }
    }

    pub fn clip(&self) -> ClipId {
        self.clip
    }

    /// Asks the decode to stop at the next packet boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> LoadOutcome {
        let result = match self.task.await {
            Ok(result) => result,
            Err(e) => Err(DecodeError::TaskFailed(e.to_string())),
        };
        LoadOutcome { clip: self.clip, result }
    }
}

/// A finished decode, ready to be installed on its clip.
#[derive(Debug)]
pub struct LoadOutcome {
    clip: ClipId,
    result: std::result::Result<DecodedAudio, DecodeError>,
}

impl LoadOutcome {
    /// For audio decoded outside `begin_load`, e.g. a generated track.
    pub fn new(clip: ClipId, result: std::result::Result<DecodedAudio, DecodeError>) -> Self {
        Self { clip, result }
    }

    pub fn clip(&self) -> ClipId {
        self.clip
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// A decoded source placed on the timeline.
pub struct AudioClip {
    id: ClipId,
    name: String,
    named: bool,
    source: SourceRef,
    audio: Option<Arc<DecodedAudio>>,
    status: LoadStatus,
    start_time: f64,
    current_track: Option<TrackId>,
    route: Route,
    cue: Option<u64>,
    bus: MasterBus,
    disposed: bool,
}

impl AudioClip {
    /// Creates an unloaded clip. Without an explicit name the clip takes the
    /// source's trailing path segment once it loads.
    pub fn new(name: Option<String>, source: SourceRef, bus: &MasterBus) -> Self {
        let id = ClipId(bus.next_id());
        let explicit = name.filter(|n| !n.trim().is_empty());
        let named = explicit.is_some();
        let name = explicit.unwrap_or_else(|| format!("Clip {}", id.0));
        bus.send(MixerCmd::AddVoice { clip: id });
        Self {
            id,
            name,
            named,
            source,
            audio: None,
            status: LoadStatus::Pending,
            start_time: 0.0,
            current_track: None,
            route: Route::Master,
            cue: None,
            bus: bus.clone(),
            disposed: false,
        }
    }

    pub fn id(&self) -> ClipId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Seconds of decoded audio; 0 until loaded.
    pub fn duration(&self) -> f64 {
        self.audio.as_ref().map_or(0.0, |a| a.duration())
    }

    pub fn current_track(&self) -> Option<TrackId> {
        self.current_track
    }

    pub fn status(&self) -> &LoadStatus {
        &self.status
    }

    pub fn audio(&self) -> Option<&Arc<DecodedAudio>> {
        self.audio.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_playable(&self) -> bool {
        !self.disposed && self.audio.is_some()
    }

    /// The channel this clip feeds, or `None` for the master route.
    pub fn channel(&self) -> Option<ChannelId> {
        match self.route {
            Route::Channel(id) => Some(id),
            Route::Master => None,
        }
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        self.playback_status_at(self.bus.clock().now())
    }

    pub fn is_playing(&self) -> bool {
        self.playback_status() == PlaybackStatus::Playing
    }

    pub(crate) fn playback_status_at(&self, now: u64) -> PlaybackStatus {
        match (self.cue, &self.audio) {
            (Some(at), Some(audio)) => {
                if now < at {
                    PlaybackStatus::Scheduled
                } else if now < at.saturating_add(audio.frames() as u64) {
                    PlaybackStatus::Playing
                } else {
                    PlaybackStatus::Finished
                }
            }
            _ => PlaybackStatus::Idle,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(EngineError::DisposedObjectUse(ObjectRef::Clip(self.id)));
        }
        Ok(())
    }

    /// Starts decoding `source` on the blocking pool.
    ///
    /// The clip keeps any previously installed audio until the outcome is
    /// handed to `finish_load`.
    pub fn begin_load<P: ClipSourceProvider>(&mut self, source: SourceRef, provider: Arc<P>) -> Result<PendingLoad> {
        self.ensure_live()?;
        let handle = Handle::try_current().map_err(|e| EngineError::DecodeFailure {
            clip: self.id,
            source: DecodeError::TaskFailed(e.to_string()),
        })?;
        self.source = source.clone();
        self.status = LoadStatus::Pending;
        log::debug!("{} decoding {:?}", self.id, self.source);
        Ok(PendingLoad::spawn(&handle, self.id, source, provider, self.bus.format()))
    }

    /// Installs a finished decode. Returns the new duration in seconds.
    pub fn finish_load(&mut self, outcome: LoadOutcome) -> Result<f64> {
        self.ensure_live()?;
        if outcome.clip != self.id {
            return Err(EngineError::ClipNotFound(outcome.clip));
        }
        match outcome.result {
            Ok(audio) => self.install(audio),
            Err(source) => Err(self.fail(source)),
        }
    }

    /// Decodes and installs in one step.
    pub async fn load<P: ClipSourceProvider>(&mut self, source: SourceRef, provider: Arc<P>) -> Result<f64> {
        let pending = self.begin_load(source, provider)?;
        let outcome = pending.wait().await;
        self.finish_load(outcome)
    }

    /// Installs audio decoded elsewhere, conforming it to the bus format.
    pub fn install(&mut self, audio: DecodedAudio) -> Result<f64> {
        self.ensure_live()?;
        let audio = match audio.conform(self.bus.format()) {
            Ok(audio) => Arc::new(audio),
            Err(source) => return Err(self.fail(source)),
        };
        let duration = audio.duration();
        self.audio = Some(audio.clone());
        self.status = LoadStatus::Loaded;
        if !self.named {
            if let Some(name) = self.source.trailing_segment() {
                self.name = name;
            }
        }
        self.bus.send(MixerCmd::Install { clip: self.id, audio: Some(audio) });
        self.bus.emit(EngineEvent::ClipLoaded { clip: self.id, duration });
        log::info!("{} '{}' loaded ({duration:.2}s)", self.id, self.name);
        Ok(duration)
    }

    fn fail(&mut self, source: DecodeError) -> EngineError {
        log::warn!("{} failed to load: {source}", self.id);
        self.status = LoadStatus::Failed(source.clone());
        if self.audio.take().is_some() || self.cue.is_some() {
            self.cue = None;
            self.bus.send(MixerCmd::Install { clip: self.id, audio: None });
        }
        self.bus.emit(EngineEvent::ClipLoadFailed { clip: self.id, reason: source.to_string() });
        EngineError::DecodeFailure { clip: self.id, source }
    }

    /// Routes output to `channel`. The previous route is replaced in the
    /// same command, so the clip never feeds two channels.
    pub fn connect(&mut self, channel: &Channel) -> Result<()> {
        self.ensure_live()?;
        if channel.is_disposed() {
            return Err(EngineError::DisposedObjectUse(ObjectRef::Channel(channel.id())));
        }
        let route = Route::Channel(channel.id());
        if self.route != route {
            self.route = route;
            self.bus.send(MixerCmd::Route { clip: self.id, route });
        }
        Ok(())
    }

    /// Sends output straight to the master bus.
    pub fn disconnect(&mut self) -> Result<()> {
        self.ensure_live()?;
        if self.route != Route::Master {
            self.route = Route::Master;
            self.bus.send(MixerCmd::Route { clip: self.id, route: Route::Master });
        }
        Ok(())
    }

    /// Starts sounding at the current clock frame, ignoring `start_time`.
    pub fn play(&mut self) -> Result<()> {
        let now = self.bus.clock().now();
        self.cue_at(now)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.cue = None;
        self.bus.send(MixerCmd::Halt { clip: self.id });
        Ok(())
    }

    pub(crate) fn cue_at(&mut self, frame: u64) -> Result<()> {
        let cmd = self.prepare_cue(frame)?;
        self.bus.send(cmd);
        Ok(())
    }

    /// Records a cue and returns the command for a caller to batch.
    pub(crate) fn prepare_cue(&mut self, frame: u64) -> Result<MixerCmd> {
        self.ensure_live()?;
        if self.audio.is_none() {
            return Err(EngineError::NotPlayable(self.id));
        }
        self.cue = Some(frame);
        Ok(MixerCmd::Cue { clip: self.id, at: frame })
    }

    /// Clears the cue, returning a halt command if there was one.
    pub(crate) fn take_cue(&mut self) -> Option<MixerCmd> {
        self.cue.take().map(|_| MixerCmd::Halt { clip: self.id })
    }

    /// Rejects negative or non-finite offsets, and offsets too far out to be
    /// counted in frames at the bus rate.
    pub fn set_start_time(&mut self, secs: f64) -> Result<()> {
        self.ensure_live()?;
        if self.bus.format().checked_secs_to_frames(secs).is_none() {
            return Err(EngineError::InvalidArgument { what: "start time", value: secs });
        }
        self.start_time = secs;
        self.bus.emit(EngineEvent::ClipStartTimeChanged { clip: self.id, start_time: secs });
        Ok(())
    }

    pub(crate) fn attach_to(&mut self, track: TrackId) {
        self.current_track = Some(track);
    }

    /// Halts, reroutes to master and clears the back-reference as one
    /// render-side step.
    pub(crate) fn detach(&mut self) {
        self.current_track = None;
        if self.disposed {
            return;
        }
        self.cue = None;
        self.route = Route::Master;
        self.bus.send(MixerCmd::Batch(vec![
            MixerCmd::Halt { clip: self.id },
            MixerCmd::Route { clip: self.id, route: Route::Master },
        ]));
    }

    /// Releases the decoded audio and the render-side voice.
    pub fn dispose(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.disposed = true;
        self.cue = None;
        self.audio = None;
        self.bus.send(MixerCmd::Release { clip: self.id });
        self.bus.emit(EngineEvent::ClipDisposed { clip: self.id });
        log::debug!("{} disposed", self.id);
        Ok(())
    }
}

impl Drop for AudioClip {
    fn drop(&mut self) {
        if !self.disposed {
            self.bus.send(MixerCmd::Release { clip: self.id });
        }
    }
}

impl fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioClip")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("start_time", &self.start_time)
            .field("duration", &self.duration())
            .field("current_track", &self.current_track)
            .field("status", &self.status)
            .field("disposed", &self.disposed)
            .finish()
    }
}
