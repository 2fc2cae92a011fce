// src/error.rs

use std::fmt;

use thiserror::Error;

use crate::engine::{ChannelId, ClipId, TrackId};

/// Why a source could not be turned into playable audio.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("cannot read audio source: {0}")]
    Io(String),
    #[error("unsupported or corrupt audio: {0}")]
    Unsupported(String),
    #[error("source has no decodable audio track")]
    NoAudioTrack,
    #[error("source decoded to zero frames")]
    Empty,
    #[error("decode cancelled")]
    Cancelled,
    #[error("resampling failed: {0}")]
    Resample(String),
    #[error("decode task failed: {0}")]
    TaskFailed(String),
}

/// The object a rejected command was aimed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectRef {
    Clip(ClipId),
    Track(TrackId),
    Channel(ChannelId),
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Clip(id) => write!(f, "{id}"),
            ObjectRef::Track(id) => write!(f, "{id}"),
            ObjectRef::Channel(id) => write!(f, "{id}"),
        }
    }
}

/// Errors returned by engine commands. A command that fails leaves the
/// object it targeted unchanged.
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("{clip} failed to load: {source}")]
    DecodeFailure {
        clip: ClipId,
        #[source]
        source: DecodeError,
    },
    #[error("invalid {what}: {value}")]
    InvalidArgument { what: &'static str, value: f64 },
    #[error("{clip} already belongs to {owner}")]
    OwnershipViolation { clip: ClipId, owner: TrackId },
    #[error("{0} has been disposed")]
    DisposedObjectUse(ObjectRef),
    #[error("{0} has no playable audio")]
    NotPlayable(ClipId),
    #[error("{clip} is already on {track}")]
    DuplicateClip { clip: ClipId, track: TrackId },
    #[error("{0} not found")]
    TrackNotFound(TrackId),
    #[error("{0} not found")]
    ClipNotFound(ClipId),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
