// src/error.rs

use daw_core::DecodeError;
use thiserror::Error;

use crate::service::JobId;

/// Anything that ends a generation job. None of these are retried.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("{endpoint} failed with HTTP {status}: {body}")]
    UpstreamServiceFailure {
        endpoint: String,
        status: u16,
        body: String,
        /// The request body we sent, if any.
        payload: Option<serde_json::Value>,
    },

    #[error("{job} did not complete after {attempts} status checks")]
    UpstreamTimeout { job: JobId, attempts: u32 },

    #[error("{job} failed upstream: {reason}")]
    JobFailed { job: JobId, reason: String },

    #[error("unexpected response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("download from {url} returned no audio")]
    EmptyAudio { url: String },

    #[error("generated audio could not be decoded: {0}")]
    Decode(#[from] DecodeError),

    #[error("configuration: {0}")]
    Config(String),
}
