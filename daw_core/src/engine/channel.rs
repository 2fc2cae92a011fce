// src/engine/channel.rs

use std::f32::consts::{FRAC_PI_4, SQRT_2};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::Serialize;

use super::mixer::{MasterBus, MixerCmd};
use super::time::db_to_gain;
use crate::error::{EngineError, ObjectRef, Result};

/// Identifier for a channel strip on the master bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel #{}", self.0)
    }
}

/// Strip parameters shared with the render context. f32 values are stored
/// as raw bits.
#[derive(Debug)]
pub(crate) struct ChannelParams {
    volume_db: AtomicU32,
    muted: AtomicBool,
    pan: AtomicU32,
}

impl ChannelParams {
    fn new() -> Self {
        Self {
            volume_db: AtomicU32::new(0.0f32.to_bits()),
            muted: AtomicBool::new(false),
            pan: AtomicU32::new(0.0f32.to_bits()),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(muted: bool) -> Self {
        let params = Self::new();
        params.muted.store(muted, Ordering::Relaxed);
        params
    }

    fn volume_db(&self) -> f32 {
        f32::from_bits(self.volume_db.load(Ordering::Relaxed))
    }

    fn pan(&self) -> f32 {
        f32::from_bits(self.pan.load(Ordering::Relaxed))
    }

    fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Read once per quantum by the mixer.
    pub(crate) fn snapshot(&self) -> StripState {
        let gain = if self.muted() { 0.0 } else { db_to_gain(self.volume_db()) };
        StripState { gain, pan: self.pan() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct StripState {
    pub gain: f32,
    pub pan: f32,
}

impl StripState {
    /// Equal-power pan, normalised so the center position is unity on both
    /// sides.
    pub(crate) fn pan_gains(&self) -> (f32, f32) {
        let angle = (self.pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
        let left = (angle.cos() * SQRT_2).min(1.0);
        let right = (angle.sin() * SQRT_2).min(1.0);
        (left, right)
    }
}

/// A track's mixing node: gain, mute and pan on one path into the master bus.
///
/// Only the owning `Track` writes these parameters.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    params: Arc<ChannelParams>,
    bus: MasterBus,
    disposed: bool,
}

impl Channel {
    pub(crate) fn new(bus: &MasterBus) -> Self {
        let id = ChannelId(bus.next_id());
        let params = Arc::new(ChannelParams::new());
        bus.send(MixerCmd::AddChannel { id, params: params.clone() });
        Self { id, params, bus: bus.clone(), disposed: false }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn volume_db(&self) -> f32 {
        self.params.volume_db()
    }

    pub fn is_muted(&self) -> bool {
        self.params.muted()
    }

    pub fn pan(&self) -> f32 {
        self.params.pan()
    }

    /// Linear gain the mixer applies this quantum; zero while muted.
    pub fn effective_gain(&self) -> f32 {
        self.params.snapshot().gain
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(EngineError::DisposedObjectUse(ObjectRef::Channel(self.id)));
        }
        Ok(())
    }

    pub(crate) fn set_volume_db(&self, db: f32) -> Result<()> {
        self.ensure_live()?;
        self.params.volume_db.store(db.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn set_muted(&self, muted: bool) -> Result<()> {
        self.ensure_live()?;
        self.params.muted.store(muted, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn set_pan(&self, pan: f32) -> Result<()> {
        self.ensure_live()?;
        self.params.pan.store(pan.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn dispose(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.disposed = true;
        self.bus.send(MixerCmd::RemoveChannel { id: self.id });
        log::debug!("{} removed from master bus", self.id);
        Ok(())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if !self.disposed {
            self.bus.send(MixerCmd::RemoveChannel { id: self.id });
        }
    }
}
