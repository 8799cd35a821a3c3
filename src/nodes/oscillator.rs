//! Oscillator node - generates waveforms (sine, saw, square, triangle)
//!
//! A scheduled source with a phase accumulator and an audio-rate modulable
//! `frequency` parameter. The phase advances by `freq / sample_rate` per
//! frame and wraps to [0, 1), so frequency sweeps stay continuous across
//! block boundaries.

use std::f64::consts::TAU;
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::bus::ChannelInterpretation;
use crate::context::{Context, RegisterOptions};
use crate::error::Result;
use crate::handle::{NodeHandle, ParamHandle};
use crate::node::{
    ChannelCountMode, NodeConfig, OutputChannelPolicy, ProcessArgs, Processor, RenderContext,
};
use crate::nodes::SourceControl;
use crate::param::Param;
use crate::scheduled::{PlaybackState, ScheduledBehavior};

const PARAM_FREQUENCY: usize = 0;

/// Waveform types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    fn to_u8(self) -> u8 {
        match self {
            Waveform::Sine => 0,
            Waveform::Square => 1,
            Waveform::Sawtooth => 2,
            Waveform::Triangle => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Waveform::Square,
            2 => Waveform::Sawtooth,
            3 => Waveform::Triangle,
            _ => Waveform::Sine,
        }
    }
}

struct OscillatorProcessor {
    behavior: ScheduledBehavior,
    waveform: Arc<AtomicU8>,
    /// Normalized phase in [0, 1).
    phase: f64,
}

impl Processor for OscillatorProcessor {
    fn process(&mut self, args: ProcessArgs<'_>, ctx: &RenderContext<'_>) {
        let window = self.behavior.update(args.node, args.outputs, ctx);
        if window.is_silent() {
            return;
        }

        let waveform = Waveform::from_u8(self.waveform.load(Ordering::Relaxed));
        let frequency = &args.params[PARAM_FREQUENCY];
        let data = args.outputs[0].bus.channel_mut(0).data_mut();

        for i in window.offset..window.offset + window.frames {
            data[i] = match waveform {
                Waveform::Sine => (self.phase * TAU).sin() as f32,
                Waveform::Square => {
                    if self.phase < 0.5 {
                        1.0
                    } else {
                        -1.0
                    }
                }
                Waveform::Sawtooth => (2.0 * self.phase - 1.0) as f32,
                Waveform::Triangle => {
                    if self.phase < 0.5 {
                        (4.0 * self.phase - 1.0) as f32
                    } else {
                        (-4.0 * self.phase + 3.0) as f32
                    }
                }
            };

            self.phase += frequency.sample(i) as f64 / ctx.sample_rate;
            while self.phase >= 1.0 {
                self.phase -= 1.0;
            }
            while self.phase < 0.0 {
                self.phase += 1.0;
            }
        }

        if window.ends_this_quantum {
            self.behavior.finish(args.node, ctx.events);
        }
    }

    fn propagates_silence(&self, _last: f64, _now: f64) -> bool {
        !matches!(
            self.behavior.state(),
            PlaybackState::Scheduled | PlaybackState::Playing
        )
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }

    fn scheduled(&self) -> Option<&ScheduledBehavior> {
        Some(&self.behavior)
    }

    fn scheduled_mut(&mut self) -> Option<&mut ScheduledBehavior> {
        Some(&mut self.behavior)
    }

    fn name(&self) -> &'static str {
        "Oscillator"
    }
}

/// A mono waveform generator source.
pub struct OscillatorNode {
    handle: NodeHandle,
    waveform: Arc<AtomicU8>,
}

impl OscillatorNode {
    pub fn new(context: &Arc<Context>, waveform: Waveform, frequency: f32) -> Result<Self> {
        let sample_rate = context.sample_rate();
        let nyquist = (sample_rate / 2.0) as f32;
        let waveform_cell = Arc::new(AtomicU8::new(waveform.to_u8()));

        let processor = OscillatorProcessor {
            behavior: ScheduledBehavior::new(),
            waveform: Arc::clone(&waveform_cell),
            phase: 0.0,
        };

        let id = context.register(
            Box::new(processor),
            NodeConfig {
                inputs: Vec::new(),
                outputs: vec![1],
                params: vec![Param::new("frequency", frequency, 0.0, nyquist)],
                channel_count: 1,
                channel_count_mode: ChannelCountMode::Explicit,
                interpretation: ChannelInterpretation::Speakers,
                channel_policy: OutputChannelPolicy::Fixed,
                sample_rate,
            },
            RegisterOptions {
                scheduled: true,
                auto_pull: false,
            },
        )?;

        Ok(Self {
            handle: NodeHandle::new(Arc::clone(context), id),
            waveform: waveform_cell,
        })
    }

    pub fn frequency(&self) -> Result<ParamHandle> {
        self.handle.param("frequency")
    }

    pub fn set_waveform(&self, waveform: Waveform) {
        self.waveform.store(waveform.to_u8(), Ordering::Relaxed);
    }

    pub fn waveform(&self) -> Waveform {
        Waveform::from_u8(self.waveform.load(Ordering::Relaxed))
    }
}

impl Deref for OscillatorNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.handle
    }
}

impl SourceControl for OscillatorNode {}
