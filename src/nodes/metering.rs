//! Metering node - per-channel peak and smoothed power readout
//!
//! Passes its input through while publishing per-channel peak and RMS
//! power through atomics, so UI threads read levels without touching any
//! lock. Registered as an automatic pull candidate: a meter at the end of
//! a chain keeps metering even with nothing connected after it.

use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::bus::ChannelInterpretation;
use crate::context::{Context, RegisterOptions};
use crate::error::Result;
use crate::handle::NodeHandle;
use crate::node::{
    ChannelCountMode, NodeConfig, OutputChannelPolicy, ProcessArgs, Processor, RenderContext,
};

/// Per-block smoothing applied to the mean-square power.
const POWER_SMOOTHING: f32 = 0.8;

struct Levels {
    peaks: Vec<AtomicU32>,
    powers: Vec<AtomicU32>,
}

struct MeteringProcessor {
    levels: Arc<Levels>,
}

impl Processor for MeteringProcessor {
    fn process(&mut self, args: ProcessArgs<'_>, _ctx: &RenderContext<'_>) {
        let input = args.inputs.bus(0);
        args.outputs[0]
            .bus
            .copy_from(input, ChannelInterpretation::Speakers);

        let frames = args.frames.max(1);
        for ch in 0..input.number_of_channels().min(self.levels.peaks.len()) {
            let data = input.channel(ch).data();
            let mut peak = 0.0f32;
            let mut sum_squares = 0.0f32;
            for &sample in &data[..args.frames] {
                peak = peak.max(sample.abs());
                sum_squares += sample * sample;
            }
            let mean_square = sum_squares / frames as f32;
            let previous = f32::from_bits(self.levels.powers[ch].load(Ordering::Relaxed));
            let smoothed = POWER_SMOOTHING * previous + (1.0 - POWER_SMOOTHING) * mean_square;

            self.levels.peaks[ch].store(peak.to_bits(), Ordering::Relaxed);
            self.levels.powers[ch].store(smoothed.to_bits(), Ordering::Relaxed);
        }
    }

    /// Meters must observe silence so their readings decay.
    fn propagates_silence(&self, _last: f64, _now: f64) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "Metering"
    }
}

/// A pass-through level meter.
pub struct MeteringNode {
    handle: NodeHandle,
    levels: Arc<Levels>,
}

impl MeteringNode {
    pub fn new(context: &Arc<Context>, channels: usize) -> Result<Self> {
        let sample_rate = context.sample_rate();
        let levels = Arc::new(Levels {
            peaks: (0..channels).map(|_| AtomicU32::new(0)).collect(),
            powers: (0..channels).map(|_| AtomicU32::new(0)).collect(),
        });

        let processor = MeteringProcessor {
            levels: Arc::clone(&levels),
        };

        let id = context.register(
            Box::new(processor),
            NodeConfig {
                inputs: vec![channels],
                outputs: vec![channels],
                params: Vec::new(),
                channel_count: channels,
                channel_count_mode: ChannelCountMode::Explicit,
                interpretation: ChannelInterpretation::Speakers,
                channel_policy: OutputChannelPolicy::Fixed,
                sample_rate,
            },
            RegisterOptions {
                scheduled: false,
                auto_pull: true,
            },
        )?;

        Ok(Self {
            handle: NodeHandle::new(Arc::clone(context), id),
            levels,
        })
    }

    /// Peak absolute sample of the latest block, per channel.
    pub fn peak(&self, channel: usize) -> f32 {
        self.levels
            .peaks
            .get(channel)
            .map(|p| f32::from_bits(p.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    /// Smoothed mean-square power, per channel.
    pub fn power(&self, channel: usize) -> f32 {
        self.levels
            .powers
            .get(channel)
            .map(|p| f32::from_bits(p.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    /// Smoothed RMS level, per channel.
    pub fn rms(&self, channel: usize) -> f32 {
        self.power(channel).sqrt()
    }
}

impl Deref for MeteringNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.handle
    }
}
