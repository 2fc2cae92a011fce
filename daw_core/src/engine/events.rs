// src/engine/events.rs

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::mpsc::{channel, Receiver, Sender};

use serde::Serialize;

use super::clip::ClipId;
use super::track::TrackId;

/// Change notifications for UI bindings.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    TrackAdded { track: TrackId, name: String },
    TrackRemoved { track: TrackId },
    VolumeChanged { track: TrackId, volume: f32 },
    MuteChanged { track: TrackId, muted: bool },
    PanChanged { track: TrackId, pan: f32 },
    ClipAdded { track: TrackId, clip: ClipId },
    ClipRemoved { track: TrackId, clip: ClipId },
    ClipLoaded { clip: ClipId, duration: f64 },
    ClipLoadFailed { clip: ClipId, reason: String },
    ClipStartTimeChanged { clip: ClipId, start_time: f64 },
    ClipDisposed { clip: ClipId },
    TransportStarted { time_zero: u64 },
    TransportStopped,
}

#[derive(Debug, Default)]
pub(crate) struct EventHub {
    listeners: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventHub {
    /// Ignores poisoning; push and retain never leave the list half-updated.
    fn listeners(&self) -> MutexGuard<'_, Vec<Sender<EngineEvent>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = channel();
        self.listeners().push(tx);
        rx
    }

    /// Delivers to every live subscriber and forgets the ones that hung up.
    pub fn emit(&self, event: EngineEvent) {
        self.listeners().retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }
}
