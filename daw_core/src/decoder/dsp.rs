// src/decoder/dsp.rs

pub fn append_interleaved_to_planar(interleaved: &[f32], planar: &mut [Vec<f32>], channels: usize) {
    for row in interleaved.chunks_exact(channels) {
        for (lane, &sample) in planar.iter_mut().zip(row) {
            lane.push(sample);
        }
    }
}

pub fn planar_len(planar: &[Vec<f32>]) -> usize {
    planar.iter().map(|v| v.len()).min().unwrap_or(0)
}

pub fn take_from_planar(planar: &mut [Vec<f32>], frames: usize) -> Vec<Vec<f32>> {
    planar
        .iter_mut()
        .map(|lane| {
            let n = frames.min(lane.len());
            let tail = lane.split_off(n);
            std::mem::replace(lane, tail)
        })
        .collect()
}

pub fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let channels = planar.len();
    let frames = planar_len(planar);
    let mut out = vec![0.0f32; frames * channels];
    for (ch, lane) in planar.iter().enumerate() {
        for (f, &sample) in lane[..frames].iter().enumerate() {
            out[f * channels + ch] = sample;
        }
    }
    out
}

/// Maps interleaved audio between channel layouts.
///
/// Mono is duplicated into stereo, stereo is averaged down to mono. Other
/// downmixes average neighbouring input channels; other upmixes repeat the
/// input channels cyclically.
pub fn updown_mix_interleaved(input: &[f32], in_ch: usize, out_ch: usize) -> Vec<f32> {
    if in_ch == out_ch {
        return input.to_vec();
    }
    let frames = input.len() / in_ch;
    let mut out = vec![0.0f32; frames * out_ch];

    match (in_ch, out_ch) {
        (1, 2) => {
            for (dst, &m) in out.chunks_exact_mut(2).zip(input) {
                dst[0] = m;
                dst[1] = m;
            }
        }
        (2, 1) => {
            for (dst, src) in out.iter_mut().zip(input.chunks_exact(2)) {
                *dst = 0.5 * (src[0] + src[1]);
            }
        }
        _ if out_ch < in_ch => {
            let factor = in_ch as f32 / out_ch as f32;
            for (dst, src) in out.chunks_exact_mut(out_ch).zip(input.chunks_exact(in_ch)) {
                for (oc, slot) in dst.iter_mut().enumerate() {
                    let start = (oc as f32 * factor).floor() as usize;
                    let end = (((oc + 1) as f32 * factor).ceil() as usize).min(in_ch);
                    let group = &src[start..end];
                    *slot = if group.is_empty() {
                        0.0
                    } else {
                        group.iter().sum::<f32>() / group.len() as f32
                    };
                }
            }
        }
        _ => {
            for (dst, src) in out.chunks_exact_mut(out_ch).zip(input.chunks_exact(in_ch)) {
                for (oc, slot) in dst.iter_mut().enumerate() {
                    *slot = src[oc % in_ch];
                }
            }
        }
    }

    out
}
