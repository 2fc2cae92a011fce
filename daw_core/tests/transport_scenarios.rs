// tests/transport_scenarios.rs

use std::collections::HashMap;
use std::sync::Arc;

use daw_core::engine::{EngineEvent, LoadStatus, Mixer};
use daw_core::{
    AudioClip, CancelFlag, ClipId, ClipSourceProvider, DecodeError, DecodedAudio, EngineConfig, EngineError,
    PlaybackStatus, SourceRef, TrackId, Transport, TransportState,
};

const RATE: u32 = 1000;

fn engine() -> (Transport, Mixer) {
    Transport::new(EngineConfig { sample_rate: RATE, channels: 2, ..Default::default() })
}

fn dc(value: f32, secs: f64) -> DecodedAudio {
    let frames = (secs * RATE as f64) as usize;
    DecodedAudio::new(vec![value; frames * 2], 2, RATE).unwrap()
}

fn loaded(t: &Transport, name: &str, value: f32, secs: f64, start: f64) -> AudioClip {
    let mut clip = t.create_clip(None, SourceRef::path(name));
    clip.install(dc(value, secs)).unwrap();
    clip.set_start_time(start).unwrap();
    clip
}

/// Renders `frames` frames and returns the left channel.
fn render(mixer: &mut Mixer, frames: usize) -> Vec<f32> {
    let mut block = vec![0.0; frames * 2];
    mixer.process(&mut block);
    block.chunks_exact(2).map(|f| f[0]).collect()
}

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-5
}

fn assert_track_invariants(t: &Transport) {
    for track in t.tracks() {
        let mut seen = Vec::new();
        for clip in track.clips() {
            assert_eq!(clip.current_track(), Some(track.id()), "{clip:?} on {}", track.id());
            assert!(!seen.contains(&clip.id()), "{} listed twice", clip.id());
            seen.push(clip.id());
        }
    }
}

/// Provider that serves fixed audio by file name.
struct Library(HashMap<String, DecodedAudio>);

impl ClipSourceProvider for Library {
    fn decode(&self, source: &SourceRef, _cancel: &CancelFlag) -> Result<DecodedAudio, DecodeError> {
        let name = source.trailing_segment().unwrap_or_default();
        self.0
            .get(&name)
            .cloned()
            .ok_or_else(|| DecodeError::Unsupported(format!("no such sample: {name}")))
    }
}

#[test]
fn kick_starts_at_once_and_an_early_stop_silences_the_bass() {
    let (mut t, mut mixer) = engine();
    let drums = t.add_track("Drums");
    let bass_track = t.add_track("Bass");
    t.track_mut(bass_track).unwrap().set_volume(0.8).unwrap();

    let kick = t.add_clip(drums, loaded(&t, "kick.wav", 0.5, 4.0, 0.0)).unwrap();
    let bass = t.add_clip(bass_track, loaded(&t, "bass.wav", 0.25, 4.0, 2.0)).unwrap();

    t.play();
    let first = render(&mut mixer, 100);
    assert!(approx(first[0], 0.5f32.tanh()), "kick sounds on the first frame");
    assert_eq!(t.clip(kick).unwrap().playback_status(), PlaybackStatus::Playing);
    assert_eq!(t.clip(bass).unwrap().playback_status(), PlaybackStatus::Scheduled);

    render(&mut mixer, 900);
    assert!((t.position() - 1.0).abs() < 1e-9);
    t.stop();
    assert_eq!(t.state(), TransportState::Stopped);
    assert_eq!(t.position(), 0.0);

    for _ in 0..4 {
        let block = render(&mut mixer, 1000);
        assert!(block.iter().all(|&s| s == 0.0), "nothing sounds after stop");
    }
    assert_eq!(t.clip(bass).unwrap().playback_status(), PlaybackStatus::Idle);
    assert_eq!(mixer.active_voices(), 0);
}

#[test]
fn bass_joins_at_two_seconds_scaled_by_its_volume() {
    let (mut t, mut mixer) = engine();
    let drums = t.add_track("Drums");
    let bass_track = t.add_track("Bass");
    t.track_mut(bass_track).unwrap().set_volume(0.8).unwrap();
    t.add_clip(drums, loaded(&t, "kick.wav", 0.5, 4.0, 0.0)).unwrap();
    t.add_clip(bass_track, loaded(&t, "bass.wav", 0.25, 4.0, 2.0)).unwrap();

    t.play();
    let left = render(&mut mixer, 2500);
    assert!(approx(left[1999], 0.5f32.tanh()));
    assert!(approx(left[2000], (0.5f32 + 0.25 * 0.8).tanh()));
}

#[test]
fn equal_start_times_on_different_tracks_share_a_frame() {
    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    let b = t.add_track("B");
    t.add_clip(a, loaded(&t, "a.wav", 0.25, 1.0, 5.0)).unwrap();
    t.add_clip(b, loaded(&t, "b.wav", 0.125, 1.0, 5.0)).unwrap();

    t.play();
    // Odd block sizes so the start lands mid-block.
    let mut left = Vec::new();
    while left.len() < 5200 {
        left.extend(render(&mut mixer, 333));
    }
    assert_eq!(left[4999], 0.0);
    assert!(approx(left[5000], (0.25f32 + 0.125).tanh()));
}

#[test]
fn play_then_stop_leaves_nothing_cued() {
    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    let b = t.add_track("B");
    let ids = [
        t.add_clip(a, loaded(&t, "1.wav", 0.1, 1.0, 0.0)).unwrap(),
        t.add_clip(a, loaded(&t, "2.wav", 0.1, 1.0, 3.0)).unwrap(),
        t.add_clip(b, loaded(&t, "3.wav", 0.1, 1.0, 0.5)).unwrap(),
    ];

    t.play();
    render(&mut mixer, 700);
    t.stop();
    render(&mut mixer, 1);

    for id in ids {
        assert_eq!(t.clip(id).unwrap().playback_status(), PlaybackStatus::Idle);
    }
    assert_eq!(mixer.active_voices(), 0);
}

#[test]
fn restarting_play_cues_from_a_fresh_time_zero() {
    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    let clip = t.add_clip(a, loaded(&t, "a.wav", 0.5, 1.0, 0.5)).unwrap();

    t.play();
    render(&mut mixer, 400);
    t.play();
    assert_eq!(t.state(), TransportState::Running { time_zero: 400 });

    let left = render(&mut mixer, 1000);
    assert_eq!(left[499], 0.0);
    assert!(left[500] > 0.0);
    assert_eq!(t.clip(clip).unwrap().playback_status(), PlaybackStatus::Playing);
}

#[test]
fn unloaded_clips_are_skipped_by_play() {
    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    let pending = t.create_clip(None, SourceRef::path("later.wav"));
    let pending = t.add_clip(a, pending).unwrap();
    t.add_clip(a, loaded(&t, "now.wav", 0.5, 1.0, 0.0)).unwrap();

    t.play();
    assert_eq!(t.clip(pending).unwrap().playback_status(), PlaybackStatus::Idle);
    assert!(render(&mut mixer, 10)[0] > 0.0);
}

#[test]
fn moving_a_clip_keeps_it_on_exactly_one_track() {
    let (mut t, _mixer) = engine();
    let a = t.add_track("A");
    let b = t.add_track("B");
    let clip = t.add_clip(a, loaded(&t, "x.wav", 0.5, 1.0, 0.0)).unwrap();

    t.move_clip(clip, b).unwrap();
    assert!(!t.track(a).unwrap().contains(clip));
    assert!(t.track(b).unwrap().contains(clip));
    assert_eq!(t.clip(clip).unwrap().current_track(), Some(b));
    assert_eq!(t.clip(clip).unwrap().channel(), Some(t.track(b).unwrap().channel().id()));
    assert_track_invariants(&t);

    assert_eq!(t.move_clip(clip, TrackId(99)), Err(EngineError::TrackNotFound(TrackId(99))));
    assert_eq!(t.move_clip(ClipId(12345), a), Err(EngineError::ClipNotFound(ClipId(12345))));
    assert!(t.track(b).unwrap().contains(clip));
}

#[test]
fn mixed_add_remove_sequence_keeps_back_references() {
    let (mut t, _mixer) = engine();
    let tracks = [t.add_track("A"), t.add_track("B"), t.add_track("C")];
    let mut placed = Vec::new();
    for i in 0..9 {
        let clip = loaded(&t, &format!("{i}.wav"), 0.1, 0.1, i as f64);
        placed.push(t.add_clip(tracks[i % 3], clip).unwrap());
    }
    assert_track_invariants(&t);

    let removed = t.remove_clip(placed[4]).unwrap();
    assert_eq!(removed.current_track(), None);
    t.move_clip(placed[0], tracks[2]).unwrap();
    t.add_clip(tracks[0], removed).unwrap();
    t.dispose_clip(placed[8]).unwrap();
    assert_track_invariants(&t);

    assert!(t.remove_clip(placed[8]).is_none());
    let total: usize = t.tracks().iter().map(|tr| tr.clips().len()).sum();
    assert_eq!(total, 8);
}

#[test]
fn removing_a_never_added_clip_mutates_nothing() {
    let (mut t, _mixer) = engine();
    let a = t.add_track("A");
    t.add_clip(a, loaded(&t, "x.wav", 0.5, 1.0, 0.0)).unwrap();
    let events = t.subscribe();
    let stranger = t.create_clip(None, SourceRef::path("y.wav"));

    assert!(t.remove_clip(stranger.id()).is_none());
    assert!(t.track(a).unwrap().clip(stranger.id()).is_none());
    assert_eq!(t.track(a).unwrap().clips().len(), 1);
    assert!(events.try_recv().is_err());
}

#[test]
fn muting_a_track_silences_only_that_track() {
    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    let b = t.add_track("B");
    t.add_clip(a, loaded(&t, "a.wav", 0.5, 1.0, 0.0)).unwrap();
    t.add_clip(b, loaded(&t, "b.wav", 0.25, 1.0, 0.0)).unwrap();
    t.play();
    assert!(approx(render(&mut mixer, 10)[0], 0.75f32.tanh()));

    t.track_mut(a).unwrap().toggle_mute().unwrap();
    assert!(approx(render(&mut mixer, 10)[0], 0.25f32.tanh()));

    t.track_mut(b).unwrap().set_volume(0.0).unwrap();
    assert_eq!(render(&mut mixer, 10)[0], 0.0);
}

#[test]
fn hard_pan_moves_the_track_to_one_side() {
    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    t.track_mut(a).unwrap().set_pan(-1.0).unwrap();
    t.add_clip(a, loaded(&t, "a.wav", 0.5, 1.0, 0.0)).unwrap();
    t.play();

    let mut block = vec![0.0; 2 * 4];
    mixer.process(&mut block);
    assert!(approx(block[0], 0.5f32.tanh()));
    assert!(block[1].abs() < 1e-6);
}

#[test]
fn disposed_clip_is_freed_on_the_control_side() {
    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    let clip = t.add_clip(a, loaded(&t, "a.wav", 0.5, 1.0, 0.0)).unwrap();
    let weak = Arc::downgrade(t.clip(clip).unwrap().audio().unwrap());
    t.play();
    render(&mut mixer, 10);

    t.dispose_clip(clip).unwrap();
    assert!(t.clip(clip).is_none());
    assert!(weak.upgrade().is_some(), "render side still holds the buffer");

    assert_eq!(render(&mut mixer, 10)[0], 0.0);
    assert!(t.collect_garbage() >= 1);
    assert!(weak.upgrade().is_none());
    assert_eq!(mixer.voice_count(), 0);
}

#[test]
fn removed_track_releases_its_channel_once() {
    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    let b = t.add_track("B");
    t.add_clip(a, loaded(&t, "a.wav", 0.5, 1.0, 0.0)).unwrap();
    render(&mut mixer, 1);
    assert_eq!(mixer.channel_count(), 2);

    let clips = t.remove_track(a).unwrap();
    render(&mut mixer, 1);
    assert_eq!(mixer.channel_count(), 1);
    assert_eq!(clips.len(), 1);

    // The detached clip plays through the master bus if re-added elsewhere.
    let back = clips.into_iter().next().unwrap();
    t.add_clip(b, back).unwrap();
    assert_eq!(t.track(b).unwrap().clips().len(), 1);
}

#[test]
fn changing_start_time_while_running_recues() {
    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    let clip = t.add_clip(a, loaded(&t, "a.wav", 0.5, 1.0, 3.0)).unwrap();
    t.play();
    render(&mut mixer, 100);

    t.set_clip_start_time(clip, 0.2).unwrap();
    let left = render(&mut mixer, 200);
    assert_eq!(left[99], 0.0);
    assert!(left[100] > 0.0);
    assert_eq!(t.set_clip_start_time(clip, -1.0), Err(EngineError::InvalidArgument { what: "start time", value: -1.0 }));
}

#[test]
fn clips_added_while_running_are_cued_against_time_zero() {
    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    let b = t.add_track("B");
    t.play();
    render(&mut mixer, 500);

    let now = t.add_clip(a, loaded(&t, "a.wav", 0.5, 1.0, 0.0)).unwrap();
    let later = t.add_clip(b, loaded(&t, "b.wav", 0.25, 1.0, 0.8)).unwrap();
    assert_eq!(t.clip(now).unwrap().playback_status(), PlaybackStatus::Playing);
    assert_eq!(t.clip(later).unwrap().playback_status(), PlaybackStatus::Scheduled);

    // Clock runs from 500; the second clip starts at frame 800.
    let left = render(&mut mixer, 400);
    assert!(approx(left[0], 0.5f32.tanh()), "joins mid-clip on the next quantum");
    assert!(approx(left[299], 0.5f32.tanh()));
    assert!(approx(left[300], 0.75f32.tanh()));
    assert_track_invariants(&t);
}

#[test]
fn far_future_start_time_schedules_without_overflow() {
    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    let clip = t.add_clip(a, loaded(&t, "a.wav", 0.5, 1.0, 1e15)).unwrap();

    t.play();
    assert!(render(&mut mixer, 100).iter().all(|&s| s == 0.0));
    assert_eq!(t.clip(clip).unwrap().playback_status(), PlaybackStatus::Scheduled);
    assert_eq!(t.snapshot().tracks[0].clips[0].playback, PlaybackStatus::Scheduled);

    assert_eq!(
        t.set_clip_start_time(clip, 1e17),
        Err(EngineError::InvalidArgument { what: "start time", value: 1e17 })
    );
    assert_eq!(t.clip(clip).unwrap().start_time(), 1e15);
    t.stop();
    render(&mut mixer, 1);
    assert_eq!(mixer.active_voices(), 0);
}

#[test]
fn events_follow_mixing_commands() {
    let (mut t, _mixer) = engine();
    let events = t.subscribe();
    let a = t.add_track("Drums");
    t.track_mut(a).unwrap().set_volume(0.5).unwrap();
    t.track_mut(a).unwrap().toggle_mute().unwrap();
    let clip = t.add_clip(a, loaded(&t, "k.wav", 0.5, 1.0, 0.0)).unwrap();
    t.play();
    t.stop();

    let got: Vec<EngineEvent> = events.try_iter().collect();
    assert!(got.contains(&EngineEvent::TrackAdded { track: a, name: "Drums".into() }));
    assert!(got.contains(&EngineEvent::VolumeChanged { track: a, volume: 0.5 }));
    assert!(got.contains(&EngineEvent::MuteChanged { track: a, muted: true }));
    assert!(got.contains(&EngineEvent::ClipAdded { track: a, clip }));
    assert!(got.contains(&EngineEvent::TransportStarted { time_zero: 0 }));
    assert_eq!(got.last(), Some(&EngineEvent::TransportStopped));
}

#[tokio::test]
async fn load_finishing_while_running_starts_mid_clip() {
    let mut lib = HashMap::new();
    let mut ramp = Vec::new();
    for f in 0..2000 {
        ramp.extend([f as f32 / 10_000.0; 2]);
    }
    lib.insert("ramp.wav".to_string(), DecodedAudio::new(ramp, 2, RATE).unwrap());
    let provider = Arc::new(Library(lib));

    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    let clip = t.create_clip(None, SourceRef::path("loops/ramp.wav"));
    let clip = t.add_clip(a, clip).unwrap();
    let pending = t.begin_load(clip, SourceRef::path("loops/ramp.wav"), provider).unwrap();

    t.play();
    render(&mut mixer, 300);

    let duration = t.finish_load(pending.wait().await).unwrap();
    assert_eq!(duration, 2.0);
    assert_eq!(t.clip(clip).unwrap().name(), "ramp.wav");

    let left = render(&mut mixer, 1);
    assert!(approx(left[0], (300.0f32 / 10_000.0).tanh()), "starts 300 frames in, got {}", left[0]);
}

#[tokio::test]
async fn load_finishing_while_stopped_cues_nothing() {
    let mut lib = HashMap::new();
    lib.insert("a.wav".to_string(), dc(0.5, 1.0));
    let provider = Arc::new(Library(lib));

    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    let clip = t.create_clip(None, SourceRef::path("a.wav"));
    let clip = t.add_clip(a, clip).unwrap();
    let pending = t.begin_load(clip, SourceRef::path("a.wav"), provider).unwrap();
    t.finish_load(pending.wait().await).unwrap();

    assert_eq!(t.clip(clip).unwrap().playback_status(), PlaybackStatus::Idle);
    assert_eq!(render(&mut mixer, 10)[0], 0.0);
}

#[tokio::test]
async fn failed_load_is_reported_and_isolated() {
    let mut lib = HashMap::new();
    lib.insert("good.wav".to_string(), dc(0.5, 1.0));
    let provider = Arc::new(Library(lib));

    let (mut t, mut mixer) = engine();
    let a = t.add_track("A");
    let good = t.create_clip(None, SourceRef::path("good.wav"));
    let good = t.add_clip(a, good).unwrap();
    let bad = t.create_clip(None, SourceRef::path("missing.wav"));
    let bad = t.add_clip(a, bad).unwrap();

    let loads = [
        t.begin_load(good, SourceRef::path("good.wav"), provider.clone()).unwrap(),
        t.begin_load(bad, SourceRef::path("missing.wav"), provider).unwrap(),
    ];
    let mut errors = Vec::new();
    for load in loads {
        if let Err(e) = t.finish_load(load.wait().await) {
            errors.push(e);
        }
    }

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], EngineError::DecodeFailure { clip, .. } if clip == bad));
    let bad_clip = t.clip(bad).unwrap();
    assert_eq!(bad_clip.duration(), 0.0);
    assert!(matches!(bad_clip.status(), LoadStatus::Failed(_)));
    assert_eq!(t.play_clip(bad), Err(EngineError::NotPlayable(bad)));

    t.play();
    assert!(approx(render(&mut mixer, 10)[0], 0.5f32.tanh()));
}

#[tokio::test]
async fn cancelled_load_reports_cancellation() {
    struct Slow;
    impl ClipSourceProvider for Slow {
        fn decode(&self, _: &SourceRef, cancel: &CancelFlag) -> Result<DecodedAudio, DecodeError> {
            while !cancel.is_cancelled() {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            Err(DecodeError::Cancelled)
        }
    }

    let (mut t, _mixer) = engine();
    let a = t.add_track("A");
    let clip = t.create_clip(None, SourceRef::path("slow.wav"));
    let clip = t.add_clip(a, clip).unwrap();
    let pending = t.begin_load(clip, SourceRef::path("slow.wav"), Arc::new(Slow)).unwrap();
    pending.cancel();
    let err = t.finish_load(pending.wait().await).unwrap_err();
    assert_eq!(err, EngineError::DecodeFailure { clip, source: DecodeError::Cancelled });
}
