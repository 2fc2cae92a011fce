// src/engine/output.rs

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};

use super::mixer::Mixer;

/// Moves `mixer` into a cpal output callback and starts the stream.
///
/// The mixer renders in its own channel layout into a scratch buffer which is
/// then mapped onto however many channels the device has.
pub fn start_output_stream(device: &Device, config: &StreamConfig, mut mixer: Mixer) -> anyhow::Result<Stream> {
    let device_channels = config.channels as usize;
    let engine_channels = mixer.format().channels;
    let mut scratch_buffer: Vec<f32> = Vec::with_capacity(4096);
    let err_fn = |err: cpal::StreamError| log::error!("output stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / device_channels.max(1);
            if scratch_buffer.len() != frames * engine_channels {
                scratch_buffer.resize(frames * engine_channels, 0.0);
            }
            mixer.process(&mut scratch_buffer);
            map_channels(&scratch_buffer, engine_channels, data, device_channels);
        },
        err_fn,
        None,
    )?;

    stream.play()?;
    Ok(stream)
}

/// Copies frames between layouts: shared channels pass through, mono is
/// spread to the first two outputs, extra device channels are silenced.
fn map_channels(src: &[f32], src_ch: usize, dst: &mut [f32], dst_ch: usize) {
    if src_ch == 0 || dst_ch == 0 {
        dst.fill(0.0);
        return;
    }
    for (out, frame) in dst.chunks_mut(dst_ch).zip(src.chunks(src_ch)) {
        for (c, sample) in out.iter_mut().enumerate() {
            *sample = match (src_ch, dst_ch) {
                (_, 1) => frame.iter().sum::<f32>() / src_ch as f32,
                (1, _) if c < 2 => frame[0],
                _ => frame.get(c).copied().unwrap_or(0.0),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::map_channels;

    #[test]
    fn stereo_onto_a_surround_device_silences_the_rest() {
        let mut dst = vec![9.0; 8];
        map_channels(&[0.1, 0.2, 0.3, 0.4], 2, &mut dst, 4);
        assert_eq!(dst, vec![0.1, 0.2, 0.0, 0.0, 0.3, 0.4, 0.0, 0.0]);
    }

    #[test]
    fn stereo_onto_mono_averages() {
        let mut dst = vec![0.0; 2];
        map_channels(&[0.2, 0.4, 1.0, 0.0], 2, &mut dst, 1);
        assert!((dst[0] - 0.3).abs() < 1e-6);
        assert!((dst[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mono_spreads_to_both_sides() {
        let mut dst = vec![0.0; 4];
        map_channels(&[0.5, 0.25], 1, &mut dst, 2);
        assert_eq!(dst, vec![0.5, 0.5, 0.25, 0.25]);
    }
}
