//! Scheduled sources: frame-accurate starts, stops, completion events

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::offline_context;
use polaron::{
    AudioBuffer, AudioPlayer, OscillatorNode, PlaybackState, SourceControl, Waveform,
};

#[test]
fn test_scheduled_start_is_frame_accurate() {
    let (context, mut renderer) = offline_context();

    // A one second mono ramp buffer scheduled 10 ms out: frames [0, 441)
    // are silent, frames [441, 441 + 44100) carry the buffer, the rest is
    // silence again, and the completion fires exactly once.
    let frames = 44_100;
    let samples: Vec<f32> = (0..frames).map(|i| (i % 100) as f32 / 100.0).collect();
    let buffer = AudioBuffer::mono(samples.clone(), 44_100);

    let player = AudioPlayer::new(&context, buffer).unwrap();
    player.connect_to_destination().unwrap();

    let completions = Arc::new(AtomicUsize::new(0));
    let completions_clone = Arc::clone(&completions);
    player
        .play_with(0.01, move || {
            completions_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let start_frame = 441;
    let total = start_frame + frames + 1024;
    let bus = renderer.render(total);
    context.drain_events();

    let data = bus.channel(0).data();
    for n in 0..start_frame {
        assert_eq!(data[n], 0.0, "frame {} before the start must be zero", n);
    }
    for n in 0..frames {
        assert!(
            (data[start_frame + n] - samples[n]).abs() < 1e-6,
            "frame {}: got {}, expected {}",
            start_frame + n,
            data[start_frame + n],
            samples[n]
        );
    }
    for n in start_frame + frames..total {
        assert_eq!(data[n], 0.0, "frame {} after the end must be zero", n);
    }

    assert_eq!(
        completions.load(Ordering::SeqCst),
        1,
        "completion callback must fire exactly once"
    );
    assert_eq!(player.playback_state(), PlaybackState::Finished);
}

#[test]
fn test_stop_trims_playback() {
    let (context, mut renderer) = offline_context();

    let buffer = AudioBuffer::mono(vec![0.5; 44_100], 44_100);
    let player = AudioPlayer::new(&context, buffer).unwrap();
    player.connect_to_destination().unwrap();

    player.play(0.0).unwrap();
    // 192 frames: one and a half quanta.
    player.stop(192.0 / 44_100.0).unwrap();

    let bus = renderer.render(512);
    context.drain_events();

    let data = bus.channel(0).data();
    assert!((data[191] - 0.5).abs() < 1e-6, "frame 191 still plays");
    assert_eq!(data[192], 0.0, "frame 192 is past the stop");
    assert!(data[192..512].iter().all(|s| *s == 0.0));
    assert_eq!(player.playback_state(), PlaybackState::Finished);
}

#[test]
fn test_finished_source_is_silent_until_reset() {
    let (context, mut renderer) = offline_context();

    let buffer = AudioBuffer::mono(vec![0.25; 256], 44_100);
    let player = AudioPlayer::new(&context, buffer).unwrap();
    player.connect_to_destination().unwrap();
    player.play(0.0).unwrap();

    renderer.run_quanta(4);
    context.drain_events();
    assert_eq!(player.playback_state(), PlaybackState::Finished);

    // Playing a finished source without reset is a no-op.
    player.play(0.0).unwrap();
    let bus = renderer.render(256);
    assert!(bus.is_silent(), "finished source must stay silent");

    // After reset it can play again from the top.
    player.reset().unwrap();
    player.connect_to_destination().unwrap();
    player.play(0.0).unwrap();
    let bus = renderer.render(256);
    let live = bus.channel(0).data().iter().any(|s| *s != 0.0);
    assert!(live, "reset source must be playable again");
}

#[test]
fn test_oscillator_state_machine() {
    let (context, mut renderer) = offline_context();

    let osc = OscillatorNode::new(&context, Waveform::Sine, 440.0).unwrap();
    osc.connect_to_destination().unwrap();
    assert_eq!(osc.playback_state(), PlaybackState::Unscheduled);

    // Scheduled half a second out: not playing yet.
    osc.play(0.5).unwrap();
    assert_eq!(osc.playback_state(), PlaybackState::Scheduled);

    renderer.run_quanta(4);
    assert_eq!(osc.playback_state(), PlaybackState::Scheduled);

    // Cross the start time.
    renderer.run_quanta((0.5 * 44_100.0 / 128.0) as usize + 2);
    assert_eq!(osc.playback_state(), PlaybackState::Playing);

    osc.stop(0.0).unwrap();
    renderer.run_quanta(2);
    context.drain_events();
    assert_eq!(osc.playback_state(), PlaybackState::Finished);
}

#[test]
fn test_looping_player_does_not_finish() {
    let (context, mut renderer) = offline_context();

    let buffer = AudioBuffer::mono(vec![0.5; 100], 44_100);
    let player = AudioPlayer::new(&context, buffer).unwrap();
    player.set_looping(true);
    player.connect_to_destination().unwrap();
    player.play(0.0).unwrap();

    // Far past the buffer length, the loop keeps producing.
    let bus = renderer.render(2048);
    assert_eq!(player.playback_state(), PlaybackState::Playing);
    let tail = bus.channel(0).data()[2047];
    assert!((tail - 0.5).abs() < 1e-6, "loop tail was {}", tail);
}
