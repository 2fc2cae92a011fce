// src/lib.rs

pub mod config;
pub mod error;
pub mod job;
pub mod prompt;
pub mod service;

pub use config::{ComposeConfig, Endpoint, PollPolicy};
pub use error::ComposeError;
pub use job::{ComposeJob, GeneratedAudio};
pub use prompt::{Prompt, PromptKind};
pub use service::{BeatovenService, CompositionService, JobId, JobStatus, MusicGenService, StableAudioService};
