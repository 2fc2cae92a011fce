// src/main.rs

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};

use daw_core::audio_runtime::AudioRuntime;
use daw_core::{SourceRef, SymphoniaDecoder, TrackId};

const VOLUME_STEP: f32 = 0.1;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("usage: player <file[@start_secs]>...");
        return Ok(());
    }

    let mut runtime = AudioRuntime::new(Duration::from_millis(50))?;
    let provider = Arc::new(SymphoniaDecoder);

    let mut pending = Vec::new();
    let mut tracks = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        let (path, start) = parse_clip_arg(arg)?;
        let transport = runtime.transport_mut();
        let track = transport.add_track(format!("Track {}", i + 1));
        let mut clip = transport.create_clip(None, SourceRef::path(&path));
        clip.set_start_time(start)?;
        let id = transport.add_clip(track, clip)?;
        pending.push(transport.begin_load(id, SourceRef::path(&path), provider.clone())?);
        tracks.push(track);
    }

    for load in pending {
        let outcome = load.wait().await;
        let id = outcome.clip();
        match runtime.transport_mut().finish_load(outcome) {
            Ok(duration) => println!("loaded {id}: {duration:.2}s"),
            Err(e) => eprintln!("⚠️ {e}"),
        }
    }

    println!("Player:");
    println!("  SPACE = Play/Stop");
    println!("  1-9   = Mute/unmute track");
    println!("  + / - = Volume of track 1");
    println!("  Q     = Quit");

    enable_raw_mode()?;
    let result = run_input_loop(&mut runtime, &tracks);
    disable_raw_mode()?;
    println!("\n🛑 Exiting player.");
    result
}

/// `path` or `path@seconds`.
fn parse_clip_arg(arg: &str) -> anyhow::Result<(String, f64)> {
    match arg.rsplit_once('@') {
        Some((path, start)) => {
            let start = start
                .parse::<f64>()
                .with_context(|| format!("bad start time in '{arg}'"))?;
            Ok((path.to_string(), start))
        }
        None => Ok((arg.to_string(), 0.0)),
    }
}

fn run_input_loop(runtime: &mut AudioRuntime, tracks: &[TrackId]) -> anyhow::Result<()> {
    loop {
        runtime.transport_mut().collect_garbage();

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(ev) = event::read()? else {
            continue;
        };
        if ev.kind != KeyEventKind::Press {
            continue;
        }
        if ev.code == KeyCode::Char('c') && ev.modifiers.contains(KeyModifiers::CONTROL) {
            break;
        }

        match ev.code {
            KeyCode::Char('q') | KeyCode::Char('Q') => break,
            KeyCode::Char(' ') => {
                let running = runtime.toggle_play();
                println!("\r{}", if running { "▶ playing" } else { "■ stopped" });
            }
            KeyCode::Char(c @ '1'..='9') => {
                let index = c as usize - '1' as usize;
                let Some(&id) = tracks.get(index) else { continue };
                if let Some(mut track) = runtime.transport_mut().track_mut(id) {
                    let muted = track.toggle_mute()?;
                    println!("\r{} {}", track.name(), if muted { "muted" } else { "unmuted" });
                }
            }
            KeyCode::Char('+') | KeyCode::Char('=') => nudge_volume(runtime, tracks, VOLUME_STEP)?,
            KeyCode::Char('-') => nudge_volume(runtime, tracks, -VOLUME_STEP)?,
            _ => {}
        }
    }
    Ok(())
}

fn nudge_volume(runtime: &mut AudioRuntime, tracks: &[TrackId], delta: f32) -> anyhow::Result<()> {
    let Some(&id) = tracks.first() else {
        return Ok(());
    };
    if let Some(mut track) = runtime.transport_mut().track_mut(id) {
        let volume = (track.volume() + delta).clamp(0.0, 2.0);
        track.set_volume(volume)?;
        println!("\r{} volume {:.1}", track.name(), volume);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::parse_clip_arg;

    #[test]
    fn clip_args_take_an_optional_start() {
        assert_eq!(parse_clip_arg("kick.wav").unwrap(), ("kick.wav".to_string(), 0.0));
        assert_eq!(parse_clip_arg("bass.wav@2.5").unwrap(), ("bass.wav".to_string(), 2.5));
        assert!(parse_clip_arg("bass.wav@soon").is_err());
    }
}
