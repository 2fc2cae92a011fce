// src/engine/track.rs

use std::fmt;
use std::ops::Deref;

use serde::Serialize;
use thiserror::Error;

use super::channel::Channel;
use super::clip::{AudioClip, ClipId};
use super::events::EngineEvent;
use super::mixer::MasterBus;
use super::time::gain_to_db;
use crate::error::{EngineError, ObjectRef, Result};

/// Identifier for a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track #{}", self.0)
    }
}

/// A clip the track refused, handed back with the reason.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct AttachError {
    pub error: EngineError,
    pub clip: AudioClip,
}

impl AttachError {
    pub fn into_clip(self) -> AudioClip {
        self.clip
    }
}

/// Mixing access to a track owned by a `Transport`.
///
/// Exposes the channel-strip settings but not clip attachment, which has to
/// go through `Transport::add_clip` so running playback can cue it.
pub struct TrackControls<'a> {
    track: &'a mut Track,
}

impl<'a> TrackControls<'a> {
    pub(crate) fn new(track: &'a mut Track) -> Self {
        Self { track }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.track.set_name(name);
    }

    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.track.set_volume(volume)
    }

    pub fn toggle_mute(&mut self) -> Result<bool> {
        self.track.toggle_mute()
    }

    pub fn set_pan(&mut self, pan: f32) -> Result<()> {
        self.track.set_pan(pan)
    }
}

impl Deref for TrackControls<'_> {
    type Target = Track;

    fn deref(&self) -> &Track {
        &*self.track
    }
}

/// One lane of the arrangement: a channel strip and the clips that feed it.
#[derive(Debug)]
pub struct Track {
    id: TrackId,
    name: String,
    volume: f32,
    muted: bool,
    pan: f32,
    channel: Channel,
    clips: Vec<AudioClip>,
    bus: MasterBus,
    disposed: bool,
}

impl Track {
    pub(crate) fn new(id: TrackId, name: String, bus: &MasterBus) -> Self {
        Self {
            id,
            name,
            volume: 1.0,
            muted: false,
            pan: 0.0,
            channel: Channel::new(bus),
            clips: Vec::new(),
            bus: bus.clone(),
            disposed: false,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Clips in timeline order.
    pub fn clips(&self) -> &[AudioClip] {
        &self.clips
    }

    pub fn clip(&self, id: ClipId) -> Option<&AudioClip> {
        self.clips.iter().find(|c| c.id() == id)
    }

    pub fn contains(&self, id: ClipId) -> bool {
        self.clip(id).is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub(crate) fn clip_mut(&mut self, id: ClipId) -> Option<&mut AudioClip> {
        self.clips.iter_mut().find(|c| c.id() == id)
    }

    pub(crate) fn clips_mut(&mut self) -> impl Iterator<Item = &mut AudioClip> {
        self.clips.iter_mut()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(EngineError::DisposedObjectUse(ObjectRef::Track(self.id)));
        }
        Ok(())
    }

    /// Linear gain; the channel gets `20·log10(volume)` dB.
    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.ensure_live()?;
        if !volume.is_finite() || volume < 0.0 {
            return Err(EngineError::InvalidArgument { what: "volume", value: volume as f64 });
        }
        self.channel.set_volume_db(gain_to_db(volume))?;
        self.volume = volume;
        self.bus.emit(EngineEvent::VolumeChanged { track: self.id, volume });
        Ok(())
    }

    /// Returns the new mute state.
    pub fn toggle_mute(&mut self) -> Result<bool> {
        self.ensure_live()?;
        let muted = !self.muted;
        self.channel.set_muted(muted)?;
        self.muted = muted;
        self.bus.emit(EngineEvent::MuteChanged { track: self.id, muted });
        Ok(muted)
    }

    pub fn set_pan(&mut self, pan: f32) -> Result<()> {
        self.ensure_live()?;
        if !(-1.0..=1.0).contains(&pan) {
            return Err(EngineError::InvalidArgument { what: "pan", value: pan as f64 });
        }
        self.channel.set_pan(pan)?;
        self.pan = pan;
        self.bus.emit(EngineEvent::PanChanged { track: self.id, pan });
        Ok(())
    }

    fn check_attach(&self, clip: &AudioClip) -> Result<()> {
        self.ensure_live()?;
        if clip.is_disposed() {
            return Err(EngineError::DisposedObjectUse(ObjectRef::Clip(clip.id())));
        }
        match clip.current_track() {
            Some(owner) if owner == self.id => {
                return Err(EngineError::DuplicateClip { clip: clip.id(), track: self.id });
            }
            Some(owner) => {
                return Err(EngineError::OwnershipViolation { clip: clip.id(), owner });
            }
            None => {}
        }
        if self.contains(clip.id()) {
            return Err(EngineError::DuplicateClip { clip: clip.id(), track: self.id });
        }
        Ok(())
    }

    /// Appends a detached clip and routes it into this track's channel.
    pub fn add_audio_clip(&mut self, mut clip: AudioClip) -> Result<ClipId, AttachError> {
        if let Err(error) = self.check_attach(&clip) {
            return Err(AttachError { error, clip });
        }
        if let Err(error) = clip.connect(&self.channel) {
            return Err(AttachError { error, clip });
        }
        clip.attach_to(self.id);
        let id = clip.id();
        log::debug!("{id} attached to {} '{}'", self.id, self.name);
        self.clips.push(clip);
        self.bus.emit(EngineEvent::ClipAdded { track: self.id, clip: id });
        Ok(id)
    }

    /// Detaches a clip and hands it back. `None` if this track never had it.
    pub fn remove_audio_clip(&mut self, id: ClipId) -> Option<AudioClip> {
        let index = self.clips.iter().position(|c| c.id() == id)?;
        let mut clip = self.clips.remove(index);
        clip.detach();
        self.bus.emit(EngineEvent::ClipRemoved { track: self.id, clip: id });
        Some(clip)
    }

    /// Detaches every clip, then releases the channel. The clips are
    /// returned to the caller.
    pub fn dispose(&mut self) -> Result<Vec<AudioClip>> {
        self.ensure_live()?;
        let mut detached = std::mem::take(&mut self.clips);
        for clip in &mut detached {
            clip.detach();
            self.bus.emit(EngineEvent::ClipRemoved { track: self.id, clip: clip.id() });
        }
        self.channel.dispose()?;
        self.disposed = true;
        log::info!("{} '{}' disposed", self.id, self.name);
        Ok(detached)
    }
}
