//! Multi-channel sample buffers with channel-layout aware mixing
//!
//! An [`AudioBus`] is an ordered set of [`AudioChannel`]s sharing one length
//! and sample rate. Buses are the unit of exchange between graph nodes: node
//! outputs render into a bus, node inputs copy or sum buses together, and
//! the destination hands one to the device adapter every quantum.
//!
//! The bus also owns the de-zipper state for smoothed gain application, so
//! gain changes never step discontinuously inside an audio block.

use crate::buffer::AudioChannel;
use crate::dsp;

/// Left channel index in a speakers-layout bus.
pub const CHANNEL_LEFT: usize = 0;
/// Right channel index in a speakers-layout bus.
pub const CHANNEL_RIGHT: usize = 1;

/// Per-sample smoothing coefficient for de-zippered gain changes.
pub(crate) const DEZIPPER_RATE: f32 = 0.005;
/// Gain deltas below this are applied flat instead of ramped.
pub(crate) const SNAP_THRESHOLD: f32 = 0.001;

/// How a fan-in point interprets channel layouts when summing buses of
/// different widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelInterpretation {
    /// Mono and stereo get up/down-mixed the way loudspeaker content
    /// expects: mono duplicates to L/R, stereo averages to (L+R)/2.
    Speakers,
    /// Channels pair up by index; unmatched destination channels stay
    /// zeroed.
    Discrete,
}

/// A fixed-topology block of multi-channel audio.
///
/// The channel count and frame length are set at construction and never
/// change for the lifetime of the bus; the graph resizes by swapping whole
/// buses at quantum boundaries instead.
pub struct AudioBus {
    channels: Vec<AudioChannel>,
    length: usize,
    sample_rate: f64,
    bus_gain: f32,
    last_mix_gain: f32,
    is_first_gain: bool,
    gain_ramp: Vec<f32>,
}

impl AudioBus {
    pub fn new(number_of_channels: usize, length: usize, sample_rate: f64) -> Self {
        debug_assert!(number_of_channels >= 1);
        debug_assert!(number_of_channels <= crate::MAX_CHANNELS);
        let channels = (0..number_of_channels)
            .map(|_| AudioChannel::new(length))
            .collect();
        Self {
            channels,
            length,
            sample_rate,
            bus_gain: 1.0,
            last_mix_gain: 1.0,
            is_first_gain: true,
            gain_ramp: vec![0.0; length],
        }
    }

    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn channel(&self, index: usize) -> &AudioChannel {
        &self.channels[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut AudioChannel {
        &mut self.channels[index]
    }

    /// True when every channel is silent.
    pub fn is_silent(&self) -> bool {
        self.channels.iter().all(|c| c.is_silent())
    }

    /// Zero every channel and mark the bus silent.
    pub fn zero(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.zero();
        }
    }

    /// Constant gain folded into every smoothed copy out of this bus.
    pub fn set_bus_gain(&mut self, gain: f32) {
        self.bus_gain = gain;
    }

    /// Forget the de-zipper history; the next smoothed copy starts at its
    /// target instead of ramping from a stale gain.
    pub fn reset_smoothing(&mut self) {
        self.is_first_gain = true;
        self.last_mix_gain = 1.0;
    }

    /// Replace this bus's contents with `source`, up/down-mixing per
    /// `interpretation` when the channel counts differ.
    pub fn copy_from(&mut self, source: &AudioBus, interpretation: ChannelInterpretation) {
        self.zero();
        self.sum_from(source, interpretation);
    }

    /// Mix `source` into this bus. Silent sources contribute nothing.
    pub fn sum_from(&mut self, source: &AudioBus, interpretation: ChannelInterpretation) {
        if source.is_silent() {
            return;
        }
        let src_count = source.number_of_channels();
        let dst_count = self.number_of_channels();

        if src_count == dst_count {
            for i in 0..dst_count {
                self.channels[i].sum_from(source.channel(i));
            }
            return;
        }

        match interpretation {
            ChannelInterpretation::Speakers if src_count == 1 && dst_count == 2 => {
                // Mono to stereo: duplicate into both speaker channels.
                self.channels[CHANNEL_LEFT].sum_from(source.channel(0));
                self.channels[CHANNEL_RIGHT].sum_from(source.channel(0));
            }
            ChannelInterpretation::Speakers if src_count == 2 && dst_count == 1 => {
                // Stereo to mono: average the speaker pair.
                let left = source.channel(CHANNEL_LEFT);
                let right = source.channel(CHANNEL_RIGHT);
                let out = self.channels[0].data_mut();
                for i in 0..out.len() {
                    out[i] += 0.5 * (left.data()[i] + right.data()[i]);
                }
            }
            _ => {
                // Discrete: pair channels by index, ignore the rest.
                for i in 0..src_count.min(dst_count) {
                    self.channels[i].sum_from(source.channel(i));
                }
            }
        }
    }

    /// Copy `source` through a smoothed gain.
    ///
    /// The effective target is `bus_gain * target_gain`. The very first call
    /// after construction (or [`reset_smoothing`](Self::reset_smoothing))
    /// starts at the target; afterwards the gain moves toward the target by
    /// `DEZIPPER_RATE` per sample, and snaps flat once the remaining delta
    /// drops under `SNAP_THRESHOLD`.
    pub fn copy_with_gain(&mut self, source: &AudioBus, target_gain: f32) {
        if source.number_of_channels() != self.number_of_channels()
            || source.length() != self.length()
            || source.is_silent()
        {
            self.zero();
            return;
        }

        let total_desired_gain = self.bus_gain * target_gain;
        let mut gain = if self.is_first_gain {
            self.is_first_gain = false;
            total_desired_gain
        } else {
            self.last_mix_gain
        };

        if (total_desired_gain - gain).abs() < SNAP_THRESHOLD {
            gain = total_desired_gain;
            for i in 0..self.channels.len() {
                let (dst, src) = (&mut self.channels[i], source.channel(i));
                dsp::vsmul(src.data(), gain, dst.data_mut());
            }
        } else {
            for value in self.gain_ramp.iter_mut() {
                gain += (total_desired_gain - gain) * DEZIPPER_RATE;
                *value = gain;
            }
            for i in 0..self.channels.len() {
                let src = source.channel(i);
                let ramp = &self.gain_ramp;
                let dst = self.channels[i].data_mut();
                for j in 0..dst.len() {
                    dst[j] = src.data()[j] * ramp[j];
                }
                dsp::flush_denormals(dst);
            }
        }

        self.last_mix_gain = gain;
    }

    /// Copy `source` multiplied by a per-sample gain series.
    ///
    /// A mono source is broadcast into every destination channel;
    /// mismatched multi-channel topologies yield silence.
    pub fn copy_with_sample_accurate_gain(&mut self, source: &AudioBus, gains: &[f32]) {
        debug_assert_eq!(gains.len(), self.length(), "gain series length mismatch");
        if source.length() != self.length() || source.is_silent() {
            self.zero();
            return;
        }

        let src_count = source.number_of_channels();
        let dst_count = self.number_of_channels();

        if src_count == 1 {
            for i in 0..dst_count {
                dsp::vmul(source.channel(0).data(), gains, self.channels[i].data_mut());
            }
        } else if src_count == dst_count {
            for i in 0..dst_count {
                dsp::vmul(source.channel(i).data(), gains, self.channels[i].data_mut());
            }
        } else {
            self.zero();
        }
    }

    /// Multiply the bus in place by a gain series ramping from `gain`
    /// toward `target`, returning the gain reached at the end of the block.
    /// Used for the connect/disconnect crossfades.
    pub fn apply_gain_ramp(&mut self, gain: f32, target: f32) -> f32 {
        if self.is_silent() {
            return if (target - gain).abs() < SNAP_THRESHOLD { target } else { gain };
        }

        if (target - gain).abs() < SNAP_THRESHOLD {
            if target != 1.0 {
                for channel in self.channels.iter_mut() {
                    channel.scale(target);
                }
                if target == 0.0 {
                    self.zero();
                }
            }
            return target;
        }

        let mut g = gain;
        for value in self.gain_ramp.iter_mut() {
            g += (target - g) * DEZIPPER_RATE;
            *value = g;
        }
        for channel in self.channels.iter_mut() {
            let data = channel.data_mut();
            for j in 0..data.len() {
                data[j] *= self.gain_ramp[j];
            }
            dsp::flush_denormals(data);
        }
        g
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_bus(channels: usize, value: f32) -> AudioBus {
        let mut bus = AudioBus::new(channels, 128, 44_100.0);
        for i in 0..channels {
            bus.channel_mut(i).data_mut().fill(value);
        }
        bus
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let mono = filled_bus(1, 0.5);
        let mut stereo = AudioBus::new(2, 128, 44_100.0);

        stereo.copy_from(&mono, ChannelInterpretation::Speakers);

        for i in 0..128 {
            assert_eq!(stereo.channel(CHANNEL_LEFT).data()[i], 0.5);
            assert_eq!(stereo.channel(CHANNEL_RIGHT).data()[i], 0.5);
        }
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let mut stereo = AudioBus::new(2, 128, 44_100.0);
        stereo.channel_mut(CHANNEL_LEFT).data_mut().fill(1.0);
        stereo.channel_mut(CHANNEL_RIGHT).data_mut().fill(0.5);

        let mut mono = AudioBus::new(1, 128, 44_100.0);
        mono.copy_from(&stereo, ChannelInterpretation::Speakers);

        for i in 0..128 {
            assert!((mono.channel(0).data()[i] - 0.75).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_mono_stereo_round_trip_is_lossless_for_correlated_signal() {
        // A mono-correlated stereo signal survives stereo -> mono -> stereo.
        let stereo = filled_bus(2, 0.25);
        let mut mono = AudioBus::new(1, 128, 44_100.0);
        mono.copy_from(&stereo, ChannelInterpretation::Speakers);
        let mut back = AudioBus::new(2, 128, 44_100.0);
        back.copy_from(&mono, ChannelInterpretation::Speakers);

        for ch in 0..2 {
            for i in 0..128 {
                assert!((back.channel(ch).data()[i] - 0.25).abs() < f32::EPSILON);
            }
        }
    }

    #[test]
    fn test_discrete_copy_zeroes_extra_destination_channels() {
        let mono = filled_bus(1, 0.5);
        let mut dest = filled_bus(2, 1.0);

        dest.copy_from(&mono, ChannelInterpretation::Discrete);

        assert_eq!(dest.channel(0).data()[0], 0.5);
        assert!(dest.channel(1).is_silent());
    }

    #[test]
    fn test_copy_from_silent_source_silences() {
        let silent = AudioBus::new(2, 128, 44_100.0);
        let mut dest = filled_bus(2, 1.0);
        dest.copy_from(&silent, ChannelInterpretation::Speakers);
        assert!(dest.is_silent());
    }

    #[test]
    fn test_copy_with_gain_first_call_snaps_to_target() {
        let source = filled_bus(1, 1.0);
        let mut dest = AudioBus::new(1, 128, 44_100.0);

        dest.copy_with_gain(&source, 0.5);

        for i in 0..128 {
            assert_eq!(dest.channel(0).data()[i], 0.5);
        }
    }

    #[test]
    fn test_copy_with_gain_ramp_is_monotonic() {
        let source = filled_bus(1, 1.0);
        let mut dest = AudioBus::new(1, 128, 44_100.0);

        // Converge the smoother at zero, then step the target to one. The
        // output must rise monotonically with no overshoot.
        dest.copy_with_gain(&source, 0.0);
        dest.copy_with_gain(&source, 1.0);

        let data = dest.channel(0).data();
        for i in 1..128 {
            assert!(
                data[i] >= data[i - 1],
                "de-zipper output decreased at sample {}: {} < {}",
                i,
                data[i],
                data[i - 1]
            );
        }
        assert!(data[127] <= 1.0);
    }

    #[test]
    fn test_copy_with_gain_converges_and_snaps() {
        let source = filled_bus(1, 1.0);
        let mut dest = AudioBus::new(1, 128, 44_100.0);

        dest.copy_with_gain(&source, 0.0);
        for _ in 0..20 {
            dest.copy_with_gain(&source, 1.0);
        }

        for i in 0..128 {
            assert_eq!(dest.channel(0).data()[i], 1.0);
        }
    }

    #[test]
    fn test_copy_with_gain_topology_mismatch_silences() {
        let source = filled_bus(2, 1.0);
        let mut dest = filled_bus(1, 1.0);
        dest.copy_with_gain(&source, 1.0);
        assert!(dest.is_silent());
    }

    #[test]
    fn test_sample_accurate_gain_broadcasts_mono() {
        let source = filled_bus(1, 1.0);
        let mut dest = AudioBus::new(2, 128, 44_100.0);
        let mut gains = vec![0.0f32; 128];
        for (i, g) in gains.iter_mut().enumerate() {
            *g = i as f32 / 128.0;
        }

        dest.copy_with_sample_accurate_gain(&source, &gains);

        for ch in 0..2 {
            for i in 0..128 {
                assert_eq!(dest.channel(ch).data()[i], gains[i]);
            }
        }
    }
}
