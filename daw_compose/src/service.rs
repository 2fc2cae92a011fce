// src/service.rs

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::Endpoint;
use crate::error::ComposeError;
use crate::prompt::Prompt;

/// Upstream id used to poll a running generation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// Still running. Carries the raw upstream status for logging.
    Pending { status: String },
    Completed { download_url: String },
    Failed { reason: String },
}

impl JobStatus {
    /// Maps an upstream status string. `completed` without a URL keeps
    /// polling; `failed`, `error` and `cancelled` end the job.
    pub fn classify(status: &str, download_url: Option<&str>, error: Option<&str>) -> Self {
        match status {
            "completed" => match download_url.filter(|u| !u.is_empty()) {
                Some(url) => JobStatus::Completed { download_url: url.to_owned() },
                None => JobStatus::Pending { status: "completed (no url yet)".into() },
            },
            "failed" | "error" | "cancelled" => JobStatus::Failed {
                reason: error.map(str::to_owned).unwrap_or_else(|| format!("status '{status}'")),
            },
            other => JobStatus::Pending { status: other.to_owned() },
        }
    }
}

/// A remote text-to-audio generator driven by submit, poll and download.
pub trait CompositionService: Send + Sync {
    /// Name handed to the decoder and used as the clip's default name.
    fn output_name(&self) -> &'static str;

    fn submit(&self, prompt: &Prompt) -> impl Future<Output = Result<JobId, ComposeError>> + Send;

    fn poll(&self, job: &JobId) -> impl Future<Output = Result<JobStatus, ComposeError>> + Send;

    fn download(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, ComposeError>> + Send;

    /// For services that answer synchronously: the URL to fetch right after
    /// `submit`, skipping the status loop.
    fn immediate_download(&self, _job: &JobId) -> Option<String> {
        None
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, ComposeError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Passes a successful response through; anything else becomes an
/// `UpstreamServiceFailure` carrying the body and the payload we sent.
async fn check(
    response: reqwest::Response,
    endpoint: &str,
    payload: Option<&Value>,
) -> Result<reqwest::Response, ComposeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    log::error!("{endpoint} failed: HTTP {status}, payload {payload:?}, body {body}");
    Err(ComposeError::UpstreamServiceFailure {
        endpoint: endpoint.to_owned(),
        status: status.as_u16(),
        body,
        payload: payload.cloned(),
    })
}

fn malformed(endpoint: &str, reason: impl Into<String>) -> ComposeError {
    ComposeError::MalformedResponse { endpoint: endpoint.to_owned(), reason: reason.into() }
}

/// Ids come back as strings from some endpoints and numbers from others.
fn id_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, ComposeError> {
    log::info!("downloading generated audio from {url}");
    let response = check(client.get(url).send().await?, "audio download", None).await?;
    let bytes = response.bytes().await?;
    log::debug!("downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

// --- Beatoven ---

pub(crate) fn beatoven_track_id(body: &Value) -> Option<String> {
    id_value(body.get("tracks").and_then(|t| t.get(0)))
}

pub(crate) fn beatoven_task_id(body: &Value) -> Option<String> {
    id_value(body.get("task_id"))
}

pub(crate) fn beatoven_status(body: &Value) -> Option<JobStatus> {
    let status = body.get("status")?.as_str()?;
    let url = body.get("downloadUrl").and_then(Value::as_str);
    let error = body.get("error").and_then(Value::as_str);
    Some(JobStatus::classify(status, url, error))
}

/// Beatoven.ai: create a track, start a WAV compose task, poll the task.
pub struct BeatovenService {
    client: reqwest::Client,
    endpoint: Endpoint,
    token: String,
}

impl BeatovenService {
    pub fn new(endpoint: &Endpoint, timeout: Duration) -> Result<Self, ComposeError> {
        let token = endpoint.require_token("BEATOVEN_API_TOKEN")?.to_owned();
        Ok(Self { client: http_client(timeout)?, endpoint: endpoint.clone(), token })
    }

    async fn post(&self, endpoint: &str, path: &str, payload: Value) -> Result<Value, ComposeError> {
        log::debug!("{endpoint}: POST {path} {payload}");
        let response = self
            .client
            .post(self.endpoint.url(path))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let body = check(response, endpoint, Some(&payload)).await?.json::<Value>().await?;
        log::debug!("{endpoint} response: {body}");
        Ok(body)
    }
}

impl CompositionService for BeatovenService {
    fn output_name(&self) -> &'static str {
        "generated-beat.wav"
    }

    async fn submit(&self, prompt: &Prompt) -> Result<JobId, ComposeError> {
        let text = prompt.beat_text()?;
        let created = self.post("track initialization", "/api/v1/tracks", json!({ "prompt": { "text": text } })).await?;
        let track = beatoven_track_id(&created)
            .ok_or_else(|| malformed("track initialization", "no track id in response"))?;
        log::info!("beatoven track {track} created");

        let composing = self
            .post(
                "track composition",
                &format!("/api/v1/tracks/compose/{track}"),
                json!({ "format": "wav", "looping": false }),
            )
            .await?;
        let task = beatoven_task_id(&composing)
            .ok_or_else(|| malformed("track composition", "no task id in response"))?;
        Ok(JobId(task))
    }

    async fn poll(&self, job: &JobId) -> Result<JobStatus, ComposeError> {
        let response = self
            .client
            .get(self.endpoint.url(&format!("/api/v1/tracks/status/{}", job.0)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body = check(response, "status check", None).await?.json::<Value>().await?;
        beatoven_status(&body).ok_or_else(|| malformed("status check", format!("no status in {body}")))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ComposeError> {
        fetch_bytes(&self.client, url).await
    }
}

// --- Stable Audio (AI/ML API) ---

pub(crate) const STABLE_AUDIO_STEPS: u32 = 100;
pub(crate) const STABLE_AUDIO_SECONDS: u32 = 10;

pub(crate) fn stable_audio_request(text: &str) -> Value {
    json!({
        "model": "stable-audio",
        "prompt": text,
        "steps": STABLE_AUDIO_STEPS,
        "seconds_total": STABLE_AUDIO_SECONDS,
    })
}

pub(crate) fn stable_audio_status(body: &Value) -> Option<JobStatus> {
    let status = body.get("status")?.as_str()?;
    let url = body.pointer("/audio_file/url").and_then(Value::as_str);
    let error = body
        .get("error")
        .and_then(|e| e.as_str().or_else(|| e.get("message").and_then(Value::as_str)));
    Some(JobStatus::classify(status, url, error))
}

/// Stable Audio through the AI/ML API generation endpoint.
pub struct StableAudioService {
    client: reqwest::Client,
    endpoint: Endpoint,
    token: String,
}

impl StableAudioService {
    pub fn new(endpoint: &Endpoint, timeout: Duration) -> Result<Self, ComposeError> {
        let token = endpoint.require_token("AIML_API_TOKEN")?.to_owned();
        Ok(Self { client: http_client(timeout)?, endpoint: endpoint.clone(), token })
    }
}

impl CompositionService for StableAudioService {
    fn output_name(&self) -> &'static str {
        "generated-sample.wav"
    }

    async fn submit(&self, prompt: &Prompt) -> Result<JobId, ComposeError> {
        let payload = stable_audio_request(&prompt.sample_text()?);
        log::debug!("audio generation: {payload}");
        let response = self
            .client
            .post(self.endpoint.url("/generate/audio"))
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let body = check(response, "audio generation", Some(&payload)).await?.json::<Value>().await?;
        let id = id_value(body.get("id")).ok_or_else(|| malformed("audio generation", format!("no id in {body}")))?;
        Ok(JobId(id))
    }

    async fn poll(&self, job: &JobId) -> Result<JobStatus, ComposeError> {
        let response = self
            .client
            .get(self.endpoint.url("/generate/audio"))
            .query(&[("generation_id", job.0.as_str())])
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body = check(response, "status check", None).await?.json::<Value>().await?;
        stable_audio_status(&body).ok_or_else(|| malformed("status check", format!("no status in {body}")))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ComposeError> {
        fetch_bytes(&self.client, url).await
    }
}

// --- Local MusicGen server ---

/// Query URL for the local server's `GET /generate?prompt=`.
pub(crate) fn musicgen_url(endpoint: &Endpoint, text: &str) -> Result<String, ComposeError> {
    let url = reqwest::Url::parse_with_params(&endpoint.url("/generate"), &[("prompt", text)])
        .map_err(|e| ComposeError::Config(format!("MUSICGEN_API_BASE is not a valid URL: {e}")))?;
    Ok(url.to_string())
}

/// The server reports failures as a 200 with `{"error": ...}` instead of
/// WAV bytes.
pub(crate) fn musicgen_error(content_type: Option<&str>, body: &[u8]) -> Option<String> {
    if !content_type.is_some_and(|ct| ct.starts_with("application/json")) {
        return None;
    }
    let reason = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
    Some(reason)
}

/// A self-hosted MusicGen server that renders the prompt inside the request
/// and answers with a mono WAV. There is no job to poll.
pub struct MusicGenService {
    client: reqwest::Client,
    endpoint: Endpoint,
}

impl MusicGenService {
    pub fn new(endpoint: &Endpoint, timeout: Duration) -> Result<Self, ComposeError> {
        Ok(Self { client: http_client(timeout)?, endpoint: endpoint.clone() })
    }
}

impl CompositionService for MusicGenService {
    fn output_name(&self) -> &'static str {
        "generated-music.wav"
    }

    /// The job id is the query URL itself.
    async fn submit(&self, prompt: &Prompt) -> Result<JobId, ComposeError> {
        let url = musicgen_url(&self.endpoint, &prompt.beat_text()?)?;
        Ok(JobId(url))
    }

    async fn poll(&self, job: &JobId) -> Result<JobStatus, ComposeError> {
        Ok(JobStatus::Completed { download_url: job.0.clone() })
    }

    fn immediate_download(&self, job: &JobId) -> Option<String> {
        Some(job.0.clone())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ComposeError> {
        log::info!("generating locally: {url}");
        let response = check(self.client.get(url).send().await?, "local generation", None).await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = response.bytes().await?;
        if let Some(reason) = musicgen_error(content_type.as_deref(), &bytes) {
            log::error!("local generation failed: {reason}");
            return Err(ComposeError::UpstreamServiceFailure {
                endpoint: "local generation".into(),
                status,
                body: reason,
                payload: None,
            });
        }
        Ok(bytes.to_vec())
    }
}
