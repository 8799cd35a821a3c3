//! Parameter automation: timelines, ramps, audio-rate modulation

mod common;

use common::{constant_source, offline_context};
use polaron::{GainNode, OscillatorNode, SourceControl, Waveform};

#[test]
fn test_linear_ramp_shapes_the_output() {
    let (context, mut renderer) = offline_context();

    // Unity signal through a gain ramping 1 -> 0 over 20 ms: output frame
    // n must equal max(0, 1 - n/882).
    let source = constant_source(&context, 1.0);
    let gain = GainNode::new(&context, 1.0).unwrap();
    source.connect(&gain).unwrap();
    gain.connect_to_destination().unwrap();

    let param = gain.gain().unwrap();
    param.set_value_at_time(1.0, 0.0).unwrap();
    param.linear_ramp_to_value_at_time(0.0, 0.02).unwrap();

    let frames = 1024;
    let bus = renderer.render(frames);

    let ramp_frames = 0.02 * 44_100.0; // 882
    for n in 0..frames {
        let expected = (1.0 - n as f32 / ramp_frames as f32).max(0.0);
        let got = bus.channel(0).data()[n];
        assert!(
            (got - expected).abs() < 1e-5,
            "frame {}: got {}, expected {}",
            n,
            got,
            expected
        );
    }
}

#[test]
fn test_set_value_at_time_steps() {
    let (context, mut renderer) = offline_context();

    let source = constant_source(&context, 1.0);
    let gain = GainNode::new(&context, 0.25).unwrap();
    source.connect(&gain).unwrap();
    gain.connect_to_destination().unwrap();

    // Step to 0.75 halfway through the render.
    let step_time = 512.0 / 44_100.0;
    gain.gain().unwrap().set_value_at_time(0.75, step_time).unwrap();

    let bus = renderer.render(1024);
    let data = bus.channel(0).data();

    assert!((data[256] - 0.25).abs() < 1e-6, "before step: {}", data[256]);
    assert!((data[768] - 0.75).abs() < 1e-6, "after step: {}", data[768]);
}

#[test]
fn test_exponential_ramp_midpoint() {
    let (context, mut renderer) = offline_context();

    let source = constant_source(&context, 1.0);
    let gain = GainNode::new(&context, 1.0).unwrap();
    source.connect(&gain).unwrap();
    gain.connect_to_destination().unwrap();

    let v1 = 0.25f32;
    let v2 = 4.0f32;
    let t2 = 0.1;
    let param = gain.gain().unwrap();
    param.set_value_at_time(v1, 0.0).unwrap();
    param.exponential_ramp_to_value_at_time(v2, t2).unwrap();

    let frames = (t2 * 44_100.0) as usize;
    let bus = renderer.render(frames);

    let mid = frames / 2;
    let expected = v1 * (v2 / v1).powf(0.5);
    let got = bus.channel(0).data()[mid];
    assert!(
        (got - expected).abs() < 1e-3,
        "midpoint: got {}, expected {}",
        got,
        expected
    );
}

#[test]
fn test_cancel_scheduled_values_holds_current() {
    let (context, mut renderer) = offline_context();

    let source = constant_source(&context, 1.0);
    let gain = GainNode::new(&context, 0.5).unwrap();
    source.connect(&gain).unwrap();
    gain.connect_to_destination().unwrap();

    let param = gain.gain().unwrap();
    param.set_value_at_time(0.9, 1.0).unwrap();
    param.cancel_scheduled_values(0.5).unwrap();

    // The cancelled event never fires; the render holds 0.5 throughout.
    let bus = renderer.render(2048);
    let last = bus.channel(0).data()[2047];
    assert!((last - 0.5).abs() < 1e-6, "got {}", last);
}

#[test]
fn test_non_finite_and_zero_targets_are_rejected() {
    let (context, _renderer) = offline_context();
    let gain = GainNode::new(&context, 1.0).unwrap();
    let param = gain.gain().unwrap();

    assert!(param.set_value(f32::NAN).is_err());
    assert!(param.set_value_at_time(f32::INFINITY, 0.0).is_err());
    assert!(param.exponential_ramp_to_value_at_time(0.0, 1.0).is_err());
    assert!(param.exponential_ramp_to_value_at_time(2.0, 1.0).is_ok());
}

#[test]
fn test_audio_rate_modulation_sums_onto_the_param() {
    let (context, mut renderer) = offline_context();

    let source = constant_source(&context, 1.0);
    let gain = GainNode::new(&context, 0.5).unwrap();
    source.connect(&gain).unwrap();
    gain.connect_to_destination().unwrap();

    // A sine oscillator driving the gain parameter: output becomes
    // 0.5 + sin(2*pi*f*n/rate).
    let lfo = OscillatorNode::new(&context, Waveform::Sine, 440.0).unwrap();
    gain.gain().unwrap().modulate_with(&lfo).unwrap();
    lfo.play(0.0).unwrap();

    let frames = 512;
    let bus = renderer.render(frames);
    let data = bus.channel(0).data();

    for n in 0..frames {
        let expected = 0.5 + (std::f64::consts::TAU * 440.0 * n as f64 / 44_100.0).sin() as f32;
        assert!(
            (data[n] - expected).abs() < 1e-4,
            "frame {}: got {}, expected {}",
            n,
            data[n],
            expected
        );
    }
}

#[test]
fn test_param_metadata_is_exposed() {
    let (context, _renderer) = offline_context();
    let gain = GainNode::new(&context, 0.7).unwrap();
    let param = gain.gain().unwrap();

    assert_eq!(param.value().unwrap(), 0.7);
    assert_eq!(param.default_value().unwrap(), 0.7);
    assert_eq!(param.min_value().unwrap(), 0.0);
    assert_eq!(param.max_value().unwrap(), 10.0);
    assert!(gain.param("no-such-param").is_err());
}
