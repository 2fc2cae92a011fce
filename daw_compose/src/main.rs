// src/main.rs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};

use daw_compose::{
    BeatovenService, ComposeConfig, ComposeJob, CompositionService, GeneratedAudio, MusicGenService, Prompt,
    PromptKind, StableAudioService,
};
use daw_core::SymphoniaDecoder;

const USAGE: &str = "usage:\n  compose beat <genre> <tempo> [requirements]\n  compose sample <genre> <tempo> <vocal_style> [lyrics]\n  compose local <genre> <tempo> [requirements]";

/// Which generator a command runs against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    Beatoven,
    StableAudio,
    /// Self-hosted MusicGen server.
    Local,
}

impl Backend {
    fn prompt_kind(self) -> PromptKind {
        match self {
            Backend::Beatoven | Backend::Local => PromptKind::Beat,
            Backend::StableAudio => PromptKind::Sample,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((backend, prompt)) = parse_args(&args)? else {
        eprintln!("{USAGE}");
        return Ok(());
    };
    let config = ComposeConfig::from_env()?;
    println!("🎵 {}", prompt.text_for(backend.prompt_kind())?);

    let generated = match backend {
        Backend::Beatoven => {
            let service = BeatovenService::new(&config.beatoven, config.request_timeout)?;
            run(service, &config, &prompt).await?
        }
        Backend::StableAudio => {
            let service = StableAudioService::new(&config.stable_audio, config.request_timeout)?;
            run(service, &config, &prompt).await?
        }
        Backend::Local => {
            let service = MusicGenService::new(&config.musicgen, config.musicgen_timeout)?;
            run(service, &config, &prompt).await?
        }
    };

    let name = generated.source.trailing_segment().unwrap_or_else(|| "generated.wav".into());
    let path = PathBuf::from(name);
    let bytes = generated.source.as_bytes().context("generated audio has no bytes")?;
    std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
    println!(
        "✅ {} saved to {} ({:.1}s, {} ch @ {} Hz)",
        generated.job,
        path.display(),
        generated.audio.duration(),
        generated.audio.channels(),
        generated.audio.sample_rate()
    );
    Ok(())
}

async fn run<S: CompositionService>(
    service: S,
    config: &ComposeConfig,
    prompt: &Prompt,
) -> anyhow::Result<GeneratedAudio> {
    let job = ComposeJob::new(service, config.poll);
    Ok(job.run(prompt, Arc::new(SymphoniaDecoder)).await?)
}

/// `None` when no subcommand was given.
fn parse_args(args: &[String]) -> anyhow::Result<Option<(Backend, Prompt)>> {
    let Some(command) = args.first() else {
        return Ok(None);
    };
    let backend = match command.as_str() {
        "beat" => Backend::Beatoven,
        "sample" => Backend::StableAudio,
        "local" => Backend::Local,
        other => bail!("unknown command '{other}'\n{USAGE}"),
    };
    let (Some(genre), Some(tempo)) = (args.get(1), args.get(2)) else {
        bail!("genre and tempo are required\n{USAGE}");
    };
    let tempo: u32 = tempo.parse().with_context(|| format!("tempo must be a whole number, got '{tempo}'"))?;
    let mut prompt = Prompt::new(genre.as_str(), tempo);

    match backend.prompt_kind() {
        PromptKind::Beat => {
            if args.len() > 3 {
                prompt = prompt.with_requirements(args[3..].join(" "));
            }
        }
        PromptKind::Sample => {
            let Some(style) = args.get(3) else {
                bail!("vocal style is required for samples\n{USAGE}");
            };
            let lyrics = (args.len() > 4).then(|| args[4..].join(" "));
            prompt = prompt.with_vocals(style.as_str(), lyrics);
        }
    }
    Ok(Some((backend, prompt)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_beat_requests() {
        let (backend, prompt) = parse_args(&args(&["beat", "lofi", "90", "warm", "keys"])).unwrap().unwrap();
        assert_eq!(backend, Backend::Beatoven);
        assert_eq!(prompt.beat_text().unwrap(), "30 seconds lofi track at 90 BPM with warm keys");
    }

    #[test]
    fn parses_sample_requests() {
        let (backend, prompt) = parse_args(&args(&["sample", "soul", "80", "choir", "the", "sea"])).unwrap().unwrap();
        assert_eq!(backend, Backend::StableAudio);
        assert_eq!(prompt.sample_text().unwrap(), "soul choir at 80 BPM with lyrics about the sea");
    }

    #[test]
    fn parses_local_requests_as_beats() {
        let (backend, prompt) = parse_args(&args(&["local", "ambient", "70", "soft", "pads"])).unwrap().unwrap();
        assert_eq!(backend, Backend::Local);
        assert_eq!(backend.prompt_kind(), PromptKind::Beat);
        assert_eq!(prompt.beat_text().unwrap(), "30 seconds ambient track at 70 BPM with soft pads");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(&[]).unwrap().is_none());
        assert!(parse_args(&args(&["remix", "x", "1"])).is_err());
        assert!(parse_args(&args(&["beat", "lofi", "fast"])).is_err());
        assert!(parse_args(&args(&["sample", "soul", "80"])).is_err());
    }
}
