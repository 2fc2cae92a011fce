// src/lib.rs

pub mod audio;
pub mod audio_runtime;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod session;

pub use decoder::{CancelFlag, ClipSourceProvider, DecodedAudio, SourceRef, SymphoniaDecoder};
pub use engine::{
    AttachError, AudioClip, ClipId, EngineConfig, EngineEvent, LoadOutcome, Mixer, PlaybackStatus, Track,
    TrackControls, TrackId, Transport, TransportState,
};
pub use error::{DecodeError, EngineError};
