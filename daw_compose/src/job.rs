// src/job.rs

use std::sync::Arc;

use daw_core::{AudioClip, CancelFlag, ClipSourceProvider, DecodeError, DecodedAudio, EngineError, SourceRef, Transport};

use crate::config::PollPolicy;
use crate::error::ComposeError;
use crate::prompt::Prompt;
use crate::service::{CompositionService, JobId, JobStatus};

/// Decoded output of a finished job, ready to become a clip.
#[derive(Debug)]
pub struct GeneratedAudio {
    pub job: JobId,
    /// The downloaded bytes, labelled with the service's output name.
    pub source: SourceRef,
    pub audio: DecodedAudio,
}

impl GeneratedAudio {
    /// A detached clip on `transport`'s bus, named after the source label.
    pub fn into_clip(self, transport: &Transport) -> Result<AudioClip, EngineError> {
        let mut clip = transport.create_clip(None, self.source);
        clip.install(self.audio)?;
        Ok(clip)
    }
}

/// Runs one prompt through a `CompositionService`: submit, poll on a fixed
/// interval, download, then decode once. Services with an immediate download
/// are never polled.
pub struct ComposeJob<S> {
    service: S,
    policy: PollPolicy,
}

impl<S: CompositionService> ComposeJob<S> {
    pub fn new(service: S, policy: PollPolicy) -> Self {
        Self { service, policy }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub async fn run<P: ClipSourceProvider>(
        &self,
        prompt: &Prompt,
        provider: Arc<P>,
    ) -> Result<GeneratedAudio, ComposeError> {
        let job = self.service.submit(prompt).await?;
        log::info!("{job} submitted");

        let url = match self.service.immediate_download(&job) {
            Some(url) => url,
            None => self.wait_for(&job).await?,
        };
        let bytes = self.service.download(&url).await?;
        if bytes.is_empty() {
            return Err(ComposeError::EmptyAudio { url });
        }

        let source = SourceRef::bytes(self.service.output_name(), bytes);
        let audio = decode_once(source.clone(), provider).await?;
        log::info!("{job} decoded: {:.2}s of audio", audio.duration());
        Ok(GeneratedAudio { job, source, audio })
    }

    /// Polls until the job completes, fails or runs out of attempts.
    async fn wait_for(&self, job: &JobId) -> Result<String, ComposeError> {
        let attempts = self.policy.max_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.policy.interval).await;
            match self.service.poll(job).await? {
                JobStatus::Completed { download_url } => {
                    log::info!("{job} completed after {attempt} status checks");
                    return Ok(download_url);
                }
                JobStatus::Failed { reason } => {
                    log::warn!("{job} failed: {reason}");
                    return Err(ComposeError::JobFailed { job: job.clone(), reason });
                }
                JobStatus::Pending { status } => {
                    log::debug!("{job} poll {attempt}/{attempts}: {status}");
                }
            }
        }
        log::warn!("{job} gave up after {attempts} status checks");
        Err(ComposeError::UpstreamTimeout { job: job.clone(), attempts })
    }
}

async fn decode_once<P: ClipSourceProvider>(source: SourceRef, provider: Arc<P>) -> Result<DecodedAudio, ComposeError> {
    let decoded = tokio::task::spawn_blocking(move || provider.decode(&source, &CancelFlag::new()))
        .await
        .map_err(|e| DecodeError::TaskFailed(e.to_string()))?;
    Ok(decoded?)
}
