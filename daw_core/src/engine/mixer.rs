// src/engine/mixer.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};

use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::channel::{ChannelId, ChannelParams};
use super::clip::ClipId;
use super::events::{EngineEvent, EventHub};
use super::time::{SampleClock, StreamFormat};
use crate::decoder::DecodedAudio;

/// Where a clip's voice is summed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Route {
    Master,
    Channel(ChannelId),
}

/// Control → render messages. Drained at the top of every quantum.
pub(crate) enum MixerCmd {
    AddChannel { id: ChannelId, params: Arc<ChannelParams> },
    RemoveChannel { id: ChannelId },
    /// Sent once per clip when it is created, so voice slots come from the
    /// preallocated map rather than growing it mid-quantum.
    AddVoice { clip: ClipId },
    /// `None` clears the voice's audio after a failed reload.
    Install { clip: ClipId, audio: Option<Arc<DecodedAudio>> },
    Route { clip: ClipId, route: Route },
    Cue { clip: ClipId, at: u64 },
    Halt { clip: ClipId },
    Release { clip: ClipId },
    /// Applied as a unit before the next quantum is rendered.
    Batch(Vec<MixerCmd>),
}

impl fmt::Debug for MixerCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixerCmd::AddChannel { id, .. } => write!(f, "AddChannel({id})"),
            MixerCmd::RemoveChannel { id } => write!(f, "RemoveChannel({id})"),
            MixerCmd::AddVoice { clip } => write!(f, "AddVoice({clip})"),
            MixerCmd::Install { clip, audio } => write!(f, "Install({clip}, loaded: {})", audio.is_some()),
            MixerCmd::Route { clip, route } => write!(f, "Route({clip} -> {route:?})"),
            MixerCmd::Cue { clip, at } => write!(f, "Cue({clip} @ {at})"),
            MixerCmd::Halt { clip } => write!(f, "Halt({clip})"),
            MixerCmd::Release { clip } => write!(f, "Release({clip})"),
            MixerCmd::Batch(cmds) => write!(f, "Batch({})", cmds.len()),
        }
    }
}

/// Heap objects the render context let go of. They are dropped on the
/// control side by `Transport::collect_garbage`.
pub(crate) enum Retired {
    Audio(Arc<DecodedAudio>),
    Channel(Arc<ChannelParams>),
    /// A drained `Batch`, kept for its allocation.
    Commands(Vec<MixerCmd>),
}

struct BusShared {
    commands: Sender<MixerCmd>,
    clock: SampleClock,
    format: StreamFormat,
    master_gain: Arc<AtomicU32>,
    next_id: AtomicU32,
    events: EventHub,
}

/// Control-side handle to the master bus.
///
/// Built once by `Transport::new` and cloned into every channel and clip.
#[derive(Clone)]
pub struct MasterBus {
    shared: Arc<BusShared>,
}

impl MasterBus {
    pub(crate) fn send(&self, cmd: MixerCmd) {
        log::debug!("mixer <- {cmd:?}");
        if self.shared.commands.send(cmd).is_err() {
            log::debug!("mixer is gone, command dropped");
        }
    }

    pub fn clock(&self) -> &SampleClock {
        &self.shared.clock
    }

    pub fn format(&self) -> StreamFormat {
        self.shared.format
    }

    pub fn master_gain(&self) -> f32 {
        f32::from_bits(self.shared.master_gain.load(Ordering::Relaxed))
    }

    pub(crate) fn set_master_gain(&self, gain: f32) {
        self.shared.master_gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// Ids are unique per bus and shared by tracks, clips and channels.
    pub(crate) fn next_id(&self) -> u32 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        self.shared.events.emit(event);
    }
}

impl fmt::Debug for MasterBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterBus")
            .field("format", &self.shared.format)
            .field("clock", &self.shared.clock.now())
            .finish()
    }
}

/// Builds both ends of a master bus plus the graveyard consumer.
///
/// `capacity` sizes the graveyard and the render side's voice and strip
/// tables. Past that many live clips or channels the tables grow in place.
pub(crate) fn master_bus(format: StreamFormat, capacity: usize) -> (MasterBus, Mixer, HeapCons<Retired>) {
    let capacity = capacity.max(1);
    let (tx, rx) = channel();
    let clock = SampleClock::default();
    let master_gain = Arc::new(AtomicU32::new(1.0f32.to_bits()));
    let (graveyard, collector) = HeapRb::<Retired>::new(capacity).split();

    let bus = MasterBus {
        shared: Arc::new(BusShared {
            commands: tx,
            clock: clock.clone(),
            format,
            master_gain: master_gain.clone(),
            next_id: AtomicU32::new(1),
            events: EventHub::default(),
        }),
    };

    let initial_capacity = 2048 * format.channels;
    let mixer = Mixer {
        format,
        clock,
        master_gain,
        commands: rx,
        strips: Vec::with_capacity(capacity),
        voices: HashMap::with_capacity(capacity),
        mix_buffer: Vec::with_capacity(initial_capacity),
        scratch_buffer: Vec::with_capacity(initial_capacity),
        graveyard,
    };
    (bus, mixer, collector)
}

/// Render-side state of one clip.
struct Voice {
    audio: Option<Arc<DecodedAudio>>,
    route: Route,
    cue: Option<u64>,
}

impl Default for Voice {
    fn default() -> Self {
        Self { audio: None, route: Route::Master, cue: None }
    }
}

impl Voice {
    /// Adds this voice's share of the block starting at `block_start`.
    /// The read position is `frame - cue`, so a cue in the past starts
    /// mid-clip at the right offset.
    fn render(&self, dst: &mut [f32], block_start: u64, channels: usize) -> bool {
        let (Some(audio), Some(cue)) = (&self.audio, self.cue) else {
            return false;
        };
        let frames = (dst.len() / channels) as u64;
        let block_end = block_start.saturating_add(frames);
        if cue >= block_end {
            return false;
        }
        let (dst_offset, src_frame) = if cue >= block_start {
            ((cue - block_start) as usize, 0usize)
        } else {
            (0usize, (block_start - cue) as usize)
        };
        audio.add_frames_into(src_frame, &mut dst[dst_offset * channels..]) > 0
    }

    fn finished_by(&self, frame: u64) -> bool {
        match (&self.audio, self.cue) {
            (Some(audio), Some(cue)) => frame >= cue.saturating_add(audio.frames() as u64),
            _ => false,
        }
    }
}

/// The render context: sums every cued voice into its channel strip, the
/// strips into the master bus, and advances the shared clock.
pub struct Mixer {
    format: StreamFormat,
    clock: SampleClock,
    master_gain: Arc<AtomicU32>,
    commands: Receiver<MixerCmd>,
    strips: Vec<(ChannelId, Arc<ChannelParams>)>,
    voices: HashMap<ClipId, Voice>,
    mix_buffer: Vec<f32>,
    scratch_buffer: Vec<f32>,
    graveyard: HeapProd<Retired>,
}

impl Mixer {
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn clock(&self) -> &SampleClock {
        &self.clock
    }

    /// Voices holding a cue, whether pending or sounding.
    pub fn active_voices(&self) -> usize {
        self.voices.values().filter(|v| v.cue.is_some()).count()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn channel_count(&self) -> usize {
        self.strips.len()
    }

    fn retire(&mut self, item: Retired) {
        // A full graveyard means the control side fell behind; the drop then
        // happens here.
        let _ = self.graveyard.try_push(item);
    }

    fn apply(&mut self, cmd: MixerCmd) {
        match cmd {
            MixerCmd::AddChannel { id, params } => {
                if let Some(slot) = self.strips.iter_mut().find(|(sid, _)| *sid == id) {
                    let old = std::mem::replace(&mut slot.1, params);
                    self.retire(Retired::Channel(old));
                } else {
                    self.strips.push((id, params));
                }
            }
            MixerCmd::RemoveChannel { id } => {
                if let Some(index) = self.strips.iter().position(|(sid, _)| *sid == id) {
                    let (_, params) = self.strips.remove(index);
                    self.retire(Retired::Channel(params));
                }
                for voice in self.voices.values_mut().filter(|v| v.route == Route::Channel(id)) {
                    voice.route = Route::Master;
                    voice.cue = None;
                }
            }
            MixerCmd::AddVoice { clip } => {
                self.voices.entry(clip).or_default();
            }
            MixerCmd::Install { clip, audio } => {
                let Some(voice) = self.voices.get_mut(&clip) else {
                    if let Some(audio) = audio {
                        self.retire(Retired::Audio(audio));
                    }
                    return;
                };
                if let Some(old) = std::mem::replace(&mut voice.audio, audio) {
                    self.retire(Retired::Audio(old));
                }
            }
            MixerCmd::Route { clip, route } => {
                if let Some(voice) = self.voices.get_mut(&clip) {
                    voice.route = route;
                }
            }
            MixerCmd::Cue { clip, at } => {
                if let Some(voice) = self.voices.get_mut(&clip) {
                    voice.cue = Some(at);
                }
            }
            MixerCmd::Halt { clip } => {
                if let Some(voice) = self.voices.get_mut(&clip) {
                    voice.cue = None;
                }
            }
            MixerCmd::Release { clip } => {
                if let Some(audio) = self.voices.remove(&clip).and_then(|v| v.audio) {
                    self.retire(Retired::Audio(audio));
                }
            }
            MixerCmd::Batch(mut cmds) => {
                for cmd in cmds.drain(..) {
                    self.apply(cmd);
                }
                self.retire(Retired::Commands(cmds));
            }
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            self.apply(cmd);
        }
    }

    fn begin_block(&mut self, needed: usize) {
        if self.mix_buffer.len() < needed {
            self.mix_buffer.resize(needed, 0.0);
        }
        if self.scratch_buffer.len() < needed {
            self.scratch_buffer.resize(needed, 0.0);
        }
        self.mix_buffer[..needed].fill(0.0);
    }

    /// Renders one quantum of interleaved audio into `out` and advances the
    /// clock by the number of frames written.
    pub fn process(&mut self, out: &mut [f32]) {
        self.drain_commands();

        let channels = self.format.channels;
        let frames = out.len() / channels;
        out.fill(0.0);
        if frames == 0 {
            return;
        }
        let needed = frames * channels;
        self.begin_block(needed);
        let block_start = self.clock.now();

        let mix = &mut self.mix_buffer[..needed];
        for voice in self.voices.values().filter(|v| v.route == Route::Master) {
            voice.render(mix, block_start, channels);
        }

        for (id, params) in &self.strips {
            let strip = params.snapshot();
            if strip.gain <= 0.0 {
                continue;
            }
            let scratch = &mut self.scratch_buffer[..needed];
            scratch.fill(0.0);
            let mut audible = false;
            for voice in self.voices.values().filter(|v| v.route == Route::Channel(*id)) {
                audible |= voice.render(scratch, block_start, channels);
            }
            if !audible {
                continue;
            }

            let (pan_l, pan_r) = strip.pan_gains();
            for (dst, src) in mix.chunks_exact_mut(channels).zip(scratch.chunks_exact(channels)) {
                if channels >= 2 {
                    dst[0] += src[0] * strip.gain * pan_l;
                    dst[1] += src[1] * strip.gain * pan_r;
                    for c in 2..channels {
                        dst[c] += src[c] * strip.gain;
                    }
                } else {
                    dst[0] += src[0] * strip.gain;
                }
            }
        }

        // Master fader, then soft clip.
        let master = f32::from_bits(self.master_gain.load(Ordering::Relaxed));
        for (o, &m) in out[..needed].iter_mut().zip(mix.iter()) {
            *o = (m * master).tanh();
        }

        let block_end = block_start.saturating_add(frames as u64);
        for voice in self.voices.values_mut() {
            if voice.finished_by(block_end) {
                voice.cue = None;
            }
        }
        self.clock.advance(frames as u64);
    }
}
