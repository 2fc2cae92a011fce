// src/audio.rs

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SampleFormat, StreamConfig};

/// The device the engine renders to, with the config the stream opens with.
pub struct OutputDevice {
    pub device: Device,
    pub config: StreamConfig,
}

impl OutputDevice {
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> usize {
        self.config.channels as usize
    }
}

/// Picks the host's default output and its preferred config.
///
/// The stream is always opened as f32; devices preferring another sample
/// format are converted by the host.
pub fn setup_output_device() -> anyhow::Result<OutputDevice> {
    let device = cpal::default_host()
        .default_output_device()
        .context("no output device available")?;
    let preferred = device
        .default_output_config()
        .context("output device has no default config")?;
    if preferred.sample_format() != SampleFormat::F32 {
        log::warn!("device prefers {:?}; opening an f32 stream anyway", preferred.sample_format());
    }

    let output = OutputDevice { device, config: preferred.config() };
    log::info!(
        "output device '{}': {} ch @ {} Hz",
        output.device.name().unwrap_or_else(|_| "unknown".into()),
        output.channels(),
        output.sample_rate()
    );
    Ok(output)
}
