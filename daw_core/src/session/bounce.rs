// src/session/bounce.rs

use std::path::Path;

use anyhow::{bail, Result};
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::engine::{Mixer, Transport, TransportState};

const BLOCK_FRAMES: u64 = 1024;

/// Plays the arrangement from zero through `mixer` and writes the result to a
/// 32-bit float WAV. Returns the number of frames written.
///
/// `mixer` must be the render side of `transport` and must not be attached
/// to a live output stream.
pub fn render_to_wav(transport: &mut Transport, mixer: &mut Mixer, path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let format = mixer.format();
    let total = format.secs_to_frames(transport.timeline_length());
    log::info!("bouncing {total} frames to {}", path.display());

    let spec = WavSpec {
        channels: format.channels as u16,
        sample_rate: format.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;

    transport.stop();
    transport.play();
    let TransportState::Running { time_zero } = transport.state() else {
        bail!("transport did not start");
    };
    let end = time_zero.saturating_add(total);

    let mut block = vec![0.0f32; BLOCK_FRAMES as usize * format.channels];
    loop {
        let now = mixer.clock().now();
        if now >= end {
            break;
        }
        // Pre-roll from the lookahead is rendered but not written.
        let (frames, write) = if now < time_zero {
            ((time_zero - now).min(BLOCK_FRAMES), false)
        } else {
            ((end - now).min(BLOCK_FRAMES), true)
        };
        let buf = &mut block[..frames as usize * format.channels];
        mixer.process(buf);
        if write {
            for &sample in buf.iter() {
                writer.write_sample(sample)?;
            }
        }
    }

    transport.stop();
    writer.finalize()?;
    Ok(total)
}
