// src/config.rs

use std::time::Duration;

use crate::error::ComposeError;

pub const DEFAULT_BEATOVEN_BASE: &str = "https://public-api.beatoven.ai";
pub const DEFAULT_AIML_BASE: &str = "https://api.aimlapi.com/v2";
pub const DEFAULT_MUSICGEN_BASE: &str = "http://localhost:8000";

/// Base URL plus bearer token for one upstream service.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub base_url: String,
    pub token: Option<String>,
}

impl Endpoint {
    pub fn require_token(&self, var: &str) -> Result<&str, ComposeError> {
        self.token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ComposeError::Config(format!("{var} is not set")))
    }

    /// `base_url` joined with `path`, without doubling the slash.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep before every status check, including the first.
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self { interval: Duration::from_millis(3000), max_attempts: 10 }
    }
}

#[derive(Clone, Debug)]
pub struct ComposeConfig {
    pub beatoven: Endpoint,
    pub stable_audio: Endpoint,
    /// Local server; needs no token.
    pub musicgen: Endpoint,
    pub poll: PollPolicy,
    pub request_timeout: Duration,
    /// The local server answers only once rendering is done.
    pub musicgen_timeout: Duration,
}

impl ComposeConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ComposeError> {
        if let Err(e) = dotenv::dotenv() {
            log::debug!("no .env loaded: {e}");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ComposeError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let number = |key: &str, default: u64| -> Result<u64, ComposeError> {
            match var(key) {
                None => Ok(default),
                Some(raw) => raw
                    .parse::<u64>()
                    .map_err(|_| ComposeError::Config(format!("{key} must be a whole number, got '{raw}'"))),
            }
        };

        let max_attempts = number("COMPOSE_MAX_ATTEMPTS", 10)?;
        if max_attempts == 0 {
            return Err(ComposeError::Config("COMPOSE_MAX_ATTEMPTS must be at least 1".into()));
        }

        Ok(Self {
            beatoven: Endpoint {
                base_url: var("BEATOVEN_API_BASE").unwrap_or_else(|| DEFAULT_BEATOVEN_BASE.into()),
                token: var("BEATOVEN_API_TOKEN"),
            },
            stable_audio: Endpoint {
                base_url: var("AIML_API_BASE").unwrap_or_else(|| DEFAULT_AIML_BASE.into()),
                token: var("AIML_API_TOKEN"),
            },
            musicgen: Endpoint {
                base_url: var("MUSICGEN_API_BASE").unwrap_or_else(|| DEFAULT_MUSICGEN_BASE.into()),
                token: None,
            },
            poll: PollPolicy {
                interval: Duration::from_millis(number("COMPOSE_POLL_INTERVAL_MS", 3000)?),
                max_attempts: u32::try_from(max_attempts).unwrap_or(u32::MAX),
            },
            request_timeout: Duration::from_secs(number("COMPOSE_REQUEST_TIMEOUT_SECS", 10)?),
            musicgen_timeout: Duration::from_secs(number("MUSICGEN_TIMEOUT_SECS", 300)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<ComposeConfig, ComposeError> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ComposeConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let c = config(&[]).unwrap();
        assert_eq!(c.beatoven.base_url, DEFAULT_BEATOVEN_BASE);
        assert_eq!(c.stable_audio.base_url, DEFAULT_AIML_BASE);
        assert_eq!(c.poll, PollPolicy::default());
        assert_eq!(c.request_timeout, Duration::from_secs(10));
        assert!(c.beatoven.token.is_none());
        assert_eq!(c.musicgen.base_url, DEFAULT_MUSICGEN_BASE);
        assert_eq!(c.musicgen_timeout, Duration::from_secs(300));
    }

    #[test]
    fn local_server_settings() {
        let c = config(&[("MUSICGEN_API_BASE", "http://gpu-box:8000"), ("MUSICGEN_TIMEOUT_SECS", "600")]).unwrap();
        assert_eq!(c.musicgen.url("/generate"), "http://gpu-box:8000/generate");
        assert_eq!(c.musicgen_timeout, Duration::from_secs(600));
        assert!(c.musicgen.token.is_none());
        assert!(matches!(config(&[("MUSICGEN_TIMEOUT_SECS", "soon")]), Err(ComposeError::Config(_))));
    }

    #[test]
    fn overrides_are_read() {
        let c = config(&[
            ("BEATOVEN_API_TOKEN", "abc"),
            ("AIML_API_BASE", "http://localhost:9000/v2/"),
            ("COMPOSE_POLL_INTERVAL_MS", "250"),
            ("COMPOSE_MAX_ATTEMPTS", " 4 "),
        ])
        .unwrap();
        assert_eq!(c.beatoven.require_token("BEATOVEN_API_TOKEN").unwrap(), "abc");
        assert_eq!(c.stable_audio.url("/generate/audio"), "http://localhost:9000/v2/generate/audio");
        assert_eq!(c.poll.interval, Duration::from_millis(250));
        assert_eq!(c.poll.max_attempts, 4);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(matches!(config(&[("COMPOSE_MAX_ATTEMPTS", "ten")]), Err(ComposeError::Config(_))));
        assert!(matches!(config(&[("COMPOSE_MAX_ATTEMPTS", "0")]), Err(ComposeError::Config(_))));
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let c = config(&[]).unwrap();
        let err = c.stable_audio.require_token("AIML_API_TOKEN").unwrap_err();
        assert_eq!(err.to_string(), "configuration: AIML_API_TOKEN is not set");
    }
}
