// src/decoder/resample.rs

use rubato::{
    calculate_cutoff, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::decoder::dsp;
use crate::error::DecodeError;

fn resample_err(e: impl std::fmt::Display) -> DecodeError {
    DecodeError::Resample(e.to_string())
}

pub fn build_resampler(
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
) -> Result<Option<SincFixedIn<f32>>, DecodeError> {
    if src_rate == dst_rate {
        return Ok(None);
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    let sinc_len = 256usize;
    let window = WindowFunction::BlackmanHarris2;
    let f_cutoff = calculate_cutoff(sinc_len, window);
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window,
    };
    let chunk_size = 1024;
    let r = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, channels).map_err(resample_err)?;
    Ok(Some(r))
}

fn try_process_exact(
    resampler: &mut SincFixedIn<f32>,
    stage_planar: &mut [Vec<f32>],
) -> Result<Option<Vec<Vec<f32>>>, DecodeError> {
    let need = resampler.input_frames_next();
    if dsp::planar_len(stage_planar) < need {
        return Ok(None);
    }
    let in_block = dsp::take_from_planar(stage_planar, need);
    let out = resampler.process(&in_block[..], None).map_err(resample_err)?;
    Ok(Some(out))
}

fn append_planar(dst: &mut [Vec<f32>], block: Vec<Vec<f32>>) {
    for (lane, chunk) in dst.iter_mut().zip(block) {
        lane.extend(chunk);
    }
}

/// Resamples a whole interleaved buffer in one pass.
///
/// The sinc filter's output delay is trimmed and the result is cut to
/// `round(frames * dst / src)` frames, so durations survive conversion.
pub fn resample_interleaved(
    input: &[f32],
    channels: usize,
    src_rate: u32,
    dst_rate: u32,
) -> Result<Vec<f32>, DecodeError> {
    let Some(mut resampler) = build_resampler(src_rate, dst_rate, channels)? else {
        return Ok(input.to_vec());
    };

    let in_frames = input.len() / channels;
    let expected = (in_frames as f64 * dst_rate as f64 / src_rate as f64).round() as usize;
    let delay = resampler.output_delay();

    let mut stage: Vec<Vec<f32>> = vec![Vec::with_capacity(in_frames); channels];
    dsp::append_interleaved_to_planar(input, &mut stage, channels);

    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];
    while let Some(block) = try_process_exact(&mut resampler, &mut stage)? {
        append_planar(&mut out, block);
    }

    let rest_len = dsp::planar_len(&stage);
    if rest_len > 0 {
        let rest = dsp::take_from_planar(&mut stage, rest_len);
        let block = resampler.process_partial(Some(&rest[..]), None).map_err(resample_err)?;
        append_planar(&mut out, block);
    }

    // Flush the filter tail until the delayed signal is fully out.
    while dsp::planar_len(&out) < expected + delay {
        let block = resampler.process_partial::<Vec<f32>>(None, None).map_err(resample_err)?;
        if block.first().is_none_or(|lane| lane.is_empty()) {
            break;
        }
        append_planar(&mut out, block);
    }

    for lane in &mut out {
        lane.drain(..delay.min(lane.len()));
        lane.truncate(expected);
    }
    Ok(dsp::interleave(&out))
}
