// src/engine/time.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Sample rate and channel layout shared by the mixer and every installed clip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: usize,
}

/// Largest timeline offset, in frames, a cue may be placed at. Leaves the
/// upper half of the `u64` range as headroom for `time_zero + offset`.
pub const MAX_OFFSET_FRAMES: u64 = i64::MAX as u64;

impl StreamFormat {
    /// Like `secs_to_frames`, but `None` when the offset is not a finite,
    /// non-negative count of at most `MAX_OFFSET_FRAMES`.
    pub fn checked_secs_to_frames(&self, secs: f64) -> Option<u64> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let frames = (secs * self.sample_rate as f64).round();
        (frames < MAX_OFFSET_FRAMES as f64).then_some(frames as u64)
    }

    pub fn secs_to_frames(&self, secs: f64) -> u64 {
        if !secs.is_finite() || secs <= 0.0 {
            return 0;
        }
        (secs * self.sample_rate as f64).round() as u64
    }

    pub fn frames_to_secs(&self, frames: u64) -> f64 {
        frames as f64 / self.sample_rate as f64
    }

    pub fn duration_to_frames(&self, duration: Duration) -> u64 {
        self.secs_to_frames(duration.as_secs_f64())
    }
}

/// Frame counter advanced by the render context.
///
/// This is the one clock every cue is expressed against. The control side
/// only reads it; `Mixer::process` advances it once per quantum after the
/// block has been rendered.
#[derive(Clone, Debug, Default)]
pub struct SampleClock(Arc<AtomicU64>);

impl SampleClock {
    pub fn now(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn advance(&self, frames: u64) {
        self.0.fetch_add(frames, Ordering::AcqRel);
    }
}

/// Linear gain to decibels. Zero (and anything below) is silence.
pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * gain.log10()
    }
}

pub fn db_to_gain(db: f32) -> f32 {
    if db == f32::NEG_INFINITY {
        0.0
    } else {
        10f32.powf(db / 20.0)
    }
}
