//! White noise source
//!
//! Uniform random samples in [-1, 1], scaled by an `amplitude` parameter.
//! Useful for testing signal paths and as an excitation source. The
//! generator is seeded per node, so two noise nodes never correlate.

use std::ops::Deref;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

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

const PARAM_AMPLITUDE: usize = 0;

struct NoiseProcessor {
    behavior: ScheduledBehavior,
    rng: StdRng,
}

impl Processor for NoiseProcessor {
    fn process(&mut self, args: ProcessArgs<'_>, ctx: &RenderContext<'_>) {
        let window = self.behavior.update(args.node, args.outputs, ctx);
        if window.is_silent() {
            return;
        }

        let amplitude = &args.params[PARAM_AMPLITUDE];
        let data = args.outputs[0].bus.channel_mut(0).data_mut();
        for i in window.offset..window.offset + window.frames {
            data[i] = self.rng.gen_range(-1.0f32..=1.0) * amplitude.sample(i);
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

    fn scheduled(&self) -> Option<&ScheduledBehavior> {
        Some(&self.behavior)
    }

    fn scheduled_mut(&mut self) -> Option<&mut ScheduledBehavior> {
        Some(&mut self.behavior)
    }

    fn name(&self) -> &'static str {
        "Noise"
    }
}

/// A mono white noise source.
pub struct NoiseNode {
    handle: NodeHandle,
}

impl NoiseNode {
    pub fn new(context: &Arc<Context>, amplitude: f32) -> Result<Self> {
        let sample_rate = context.sample_rate();
        let processor = NoiseProcessor {
            behavior: ScheduledBehavior::new(),
            rng: StdRng::from_entropy(),
        };

        let id = context.register(
            Box::new(processor),
            NodeConfig {
                inputs: Vec::new(),
                outputs: vec![1],
                params: vec![Param::new("amplitude", amplitude, 0.0, 1.0)],
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
        })
    }

    pub fn amplitude(&self) -> Result<ParamHandle> {
        self.handle.param("amplitude")
    }
}

impl Deref for NoiseNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.handle
    }
}

impl SourceControl for NoiseNode {}
