//! Equal-power panning at the stereo destination

mod common;

use common::{offline_context, peak};
use polaron::{OscillatorNode, PannerNode, SourceControl, Waveform};

/// Render half a second and return the per-channel peak of the tail, where
/// the oscillator has settled into steady state.
fn rendered_peaks(pan: f32) -> (f32, f32) {
    let (context, mut renderer) = offline_context();

    let osc = OscillatorNode::new(&context, Waveform::Sine, 440.0).unwrap();
    let panner = PannerNode::new(&context).unwrap();
    osc.connect(&panner).unwrap();
    panner.connect_to_destination().unwrap();
    panner.pan().unwrap().set_value(pan).unwrap();
    osc.play(0.0).unwrap();

    let bus = renderer.render(22_050);
    let tail = 11_025;
    let left = peak(&bus.channel(0).data()[tail..]);
    let right = peak(&bus.channel(1).data()[tail..]);
    (left, right)
}

#[test]
fn test_center_pan_splits_equal_power() {
    let (left, right) = rendered_peaks(0.0);
    let expected = (2.0f32).sqrt() / 2.0;
    assert!(
        (left - expected).abs() < 1e-3,
        "center left peak {}, expected {}",
        left,
        expected
    );
    assert!(
        (right - expected).abs() < 1e-3,
        "center right peak {}, expected {}",
        right,
        expected
    );
}

#[test]
fn test_full_left_pan() {
    let (left, right) = rendered_peaks(-1.0);
    assert!((left - 1.0).abs() < 1e-3, "full-left left peak {}", left);
    assert!(right.abs() < 1e-3, "full-left right peak {}", right);
}

#[test]
fn test_full_right_pan() {
    let (left, right) = rendered_peaks(1.0);
    assert!(left.abs() < 1e-3, "full-right left peak {}", left);
    assert!((right - 1.0).abs() < 1e-3, "full-right right peak {}", right);
}

#[test]
fn test_pan_sweep_preserves_power() {
    // Across the sweep, left^2 + right^2 stays within a dB of unity.
    for pan in [-1.0, -0.5, 0.0, 0.5, 1.0] {
        let (left, right) = rendered_peaks(pan);
        let power = left * left + right * right;
        assert!(
            (power - 1.0).abs() < 0.02,
            "pan {} total power {}, expected 1.0",
            pan,
            power
        );
    }
}
