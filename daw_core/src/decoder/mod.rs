// src/decoder/mod.rs

pub mod dsp;
pub mod resample;

use std::fmt;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::engine::time::StreamFormat;
use crate::error::DecodeError;

/// Where a clip's audio comes from.
#[derive(Clone)]
pub enum SourceRef {
    Path(PathBuf),
    /// In-memory audio; `label` stands in for the file name.
    Bytes { label: String, bytes: Arc<[u8]> },
}

impl SourceRef {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        SourceRef::Path(path.into())
    }

    pub fn bytes(label: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        SourceRef::Bytes { label: label.into(), bytes: bytes.into() }
    }

    /// The last `/`-separated segment, used as a clip's default name.
    pub fn trailing_segment(&self) -> Option<String> {
        match self {
            SourceRef::Path(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            SourceRef::Bytes { label, .. } => label
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SourceRef::Bytes { bytes, .. } => Some(&bytes[..]),
            SourceRef::Path(_) => None,
        }
    }

    fn extension(&self) -> Option<String> {
        let name = self.trailing_segment()?;
        Path::new(&name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Path(path) => f.debug_tuple("Path").field(path).finish(),
            SourceRef::Bytes { label, bytes } => f
                .debug_struct("Bytes")
                .field("label", label)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

/// Fully decoded, interleaved f32 audio.
#[derive(Clone, PartialEq)]
pub struct DecodedAudio {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

impl DecodedAudio {
    /// Wraps interleaved samples. A trailing partial frame is dropped.
    pub fn new(mut samples: Vec<f32>, channels: usize, sample_rate: u32) -> Result<Self, DecodeError> {
        if channels == 0 || sample_rate == 0 {
            return Err(DecodeError::Unsupported(format!(
                "{channels} channels at {sample_rate} Hz"
            )));
        }
        let frames = samples.len() / channels;
        if frames == 0 {
            return Err(DecodeError::Empty);
        }
        samples.truncate(frames * channels);
        Ok(Self { samples, channels, sample_rate })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn format(&self) -> StreamFormat {
        StreamFormat { sample_rate: self.sample_rate, channels: self.channels }
    }

    /// Adds frames starting at `from` onto `dst`, stopping at whichever ends
    /// first. Returns the number of frames written.
    pub(crate) fn add_frames_into(&self, from: usize, dst: &mut [f32]) -> usize {
        let start = from.saturating_mul(self.channels);
        if start >= self.samples.len() {
            return 0;
        }
        let src = &self.samples[start..];
        let n = dst.len().min(src.len());
        for (d, s) in dst[..n].iter_mut().zip(src) {
            *d += *s;
        }
        n / self.channels
    }

    /// Converts to `format`: channel remap first, then sinc resampling.
    pub fn conform(self, format: StreamFormat) -> Result<Self, DecodeError> {
        let mut audio = self;
        if audio.channels != format.channels {
            let samples = dsp::updown_mix_interleaved(&audio.samples, audio.channels, format.channels);
            audio = DecodedAudio { samples, channels: format.channels, ..audio };
        }
        if audio.sample_rate != format.sample_rate {
            let samples = resample::resample_interleaved(
                &audio.samples,
                audio.channels,
                audio.sample_rate,
                format.sample_rate,
            )?;
            audio = DecodedAudio { samples, sample_rate: format.sample_rate, ..audio };
        }
        if audio.frames() == 0 {
            return Err(DecodeError::Empty);
        }
        Ok(audio)
    }
}

impl fmt::Debug for DecodedAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedAudio")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}

/// Shared flag a decode checks between packets.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Turns a source reference into decoded audio.
///
/// Called from the blocking pool, never from the render context.
pub trait ClipSourceProvider: Send + Sync + 'static {
    fn decode(&self, source: &SourceRef, cancel: &CancelFlag) -> Result<DecodedAudio, DecodeError>;
}

/// Decodes WAV, MP3, FLAC, OGG and AAC with symphonia.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaDecoder;

impl ClipSourceProvider for SymphoniaDecoder {
    fn decode(&self, source: &SourceRef, cancel: &CancelFlag) -> Result<DecodedAudio, DecodeError> {
        let mut hint = Hint::new();
        if let Some(ext) = source.extension() {
            hint.with_extension(&ext);
        }
        let media: Box<dyn MediaSource> = match source {
            SourceRef::Path(path) => {
                let file = File::open(path)
                    .map_err(|e| DecodeError::Io(format!("{}: {e}", path.display())))?;
                Box::new(file)
            }
            SourceRef::Bytes { bytes, .. } => Box::new(Cursor::new(bytes.clone())),
        };
        decode_stream(media, &hint, cancel)
    }
}

fn symphonia_err(e: SymphoniaError) -> DecodeError {
    match e {
        SymphoniaError::IoError(io) => DecodeError::Io(io.to_string()),
        other => DecodeError::Unsupported(other.to_string()),
    }
}

fn decode_stream(
    media: Box<dyn MediaSource>,
    hint: &Hint,
    cancel: &CancelFlag,
) -> Result<DecodedAudio, DecodeError> {
    let mss = MediaSourceStream::new(media, Default::default());
    let probed = get_probe()
        .format(hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(symphonia_err)?;
    let mut format = probed.format;
    let track = format.default_track().ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(symphonia_err)?;

    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels: Option<usize> = None;
    // (buffer, frame capacity, channel count)
    let mut sample_buf: Option<(SampleBuffer<f32>, usize, usize)> = None;
    let mut samples = Vec::<f32>::new();

    loop {
        if cancel.is_cancelled() {
            return Err(DecodeError::Cancelled);
        }
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(symphonia_err(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("skipping undecodable packet: {e}");
                continue;
            }
            Err(SymphoniaError::IoError(_)) => continue,
            Err(e) => return Err(symphonia_err(e)),
        };
        if decoded.frames() == 0 {
            continue;
        }

        let spec = *decoded.spec();
        let packet_channels = spec.channels.count();
        let capacity = decoded.capacity();
        // The first packet fixes the layout for the whole clip.
        let out_channels = *channels.get_or_insert(packet_channels);
        sample_rate.get_or_insert(spec.rate);

        let stale = sample_buf
            .as_ref()
            .is_none_or(|(_, cap, ch)| *cap < capacity || *ch != packet_channels);
        if stale {
            sample_buf = Some((SampleBuffer::<f32>::new(capacity as u64, spec), capacity, packet_channels));
        }
        let Some((buf, _, _)) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        if packet_channels == out_channels {
            samples.extend_from_slice(buf.samples());
        } else {
            samples.extend(dsp::updown_mix_interleaved(buf.samples(), packet_channels, out_channels));
        }
    }

    let (Some(channels), Some(sample_rate)) = (channels, sample_rate) else {
        return Err(DecodeError::Empty);
    };
    DecodedAudio::new(samples, channels, sample_rate)
}
