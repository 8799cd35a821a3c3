//! Gain node - scales its input by the `gain` parameter
//!
//! The workhorse volume control. With a plain scalar gain the copy runs
//! through the bus de-zipper so stepped gain changes glide instead of
//! clicking; with timeline events or audio-rate modulation on the
//! parameter it multiplies by the materialized per-frame series.

use std::ops::Deref;
use std::sync::Arc;

use crate::bus::ChannelInterpretation;
use crate::context::{Context, RegisterOptions};
use crate::error::Result;
use crate::handle::{NodeHandle, ParamHandle};
use crate::node::{
    ChannelCountMode, NodeConfig, OutputChannelPolicy, ProcessArgs, Processor, RenderContext,
};
use crate::param::Param;

const PARAM_GAIN: usize = 0;

struct GainProcessor;

impl Processor for GainProcessor {
    fn process(&mut self, args: ProcessArgs<'_>, _ctx: &RenderContext<'_>) {
        debug_assert!(!args.outputs.is_empty(), "gain node requires an output");
        let input = args.inputs.bus(0);
        let gain = &args.params[PARAM_GAIN];
        let output = &mut args.outputs[0].bus;

        if gain.is_sample_accurate() {
            output.copy_with_sample_accurate_gain(input, &gain.values()[..args.frames]);
        } else {
            output.copy_with_gain(input, gain.value());
        }
    }

    fn name(&self) -> &'static str {
        "Gain"
    }
}

/// A node scaling its input by a smoothed, automatable gain.
pub struct GainNode {
    handle: NodeHandle,
}

impl GainNode {
    /// Create a gain node with the given starting gain.
    pub fn new(context: &Arc<Context>, gain: f32) -> Result<Self> {
        let sample_rate = context.sample_rate();
        let id = context.register(
            Box::new(GainProcessor),
            NodeConfig {
                inputs: vec![1],
                outputs: vec![1],
                params: vec![Param::new("gain", gain, 0.0, 10.0)],
                channel_count: 1,
                channel_count_mode: ChannelCountMode::Max,
                interpretation: ChannelInterpretation::Speakers,
                channel_policy: OutputChannelPolicy::FollowInput,
                sample_rate,
            },
            RegisterOptions::default(),
        )?;
        Ok(Self {
            handle: NodeHandle::new(Arc::clone(context), id),
        })
    }

    pub fn gain(&self) -> Result<ParamHandle> {
        self.handle.param("gain")
    }
}

impl Deref for GainNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.handle
    }
}
