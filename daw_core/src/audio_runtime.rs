// src/audio_runtime.rs

use std::time::Duration;

use cpal::Stream;

use crate::audio::setup_output_device;
use crate::engine::output::start_output_stream;
use crate::engine::{EngineConfig, Transport};

/// Owns the transport and the live cpal stream its mixer renders into.
pub struct AudioRuntime {
    transport: Transport,
    _stream: Stream,
}

impl AudioRuntime {
    /// Opens the default output device and runs a stereo engine at the
    /// device's sample rate.
    pub fn new(lookahead: Duration) -> anyhow::Result<Self> {
        let output = setup_output_device()?;
        let config = EngineConfig {
            sample_rate: output.sample_rate(),
            channels: 2,
            lookahead,
            ..EngineConfig::default()
        };
        let (transport, mixer) = Transport::new(config);
        let stream = start_output_stream(&output.device, &output.config, mixer)?;
        Ok(Self { transport, _stream: stream })
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// Returns true if the transport is running afterwards.
    pub fn toggle_play(&mut self) -> bool {
        if self.transport.is_running() {
            self.transport.stop();
        } else {
            self.transport.play();
        }
        self.transport.is_running()
    }

    pub fn position(&self) -> Duration {
        Duration::from_secs_f64(self.transport.position())
    }
}
