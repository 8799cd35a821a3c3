//! Panner node - equal-power stereo placement
//!
//! Positions its input in the stereo field using the equal-power law:
//! `angle = (pan + 1) * PI/4`, left gain `cos(angle)`, right gain
//! `sin(angle)`. Constant perceived loudness across the sweep, √2/2 per
//! side at center. The `pan` parameter runs -1.0 (full left) to 1.0
//! (full right) and accepts audio-rate modulation.

use std::f32::consts::FRAC_PI_4;
use std::ops::Deref;
use std::sync::Arc;

use crate::bus::{ChannelInterpretation, CHANNEL_LEFT, CHANNEL_RIGHT};
use crate::context::{Context, RegisterOptions};
use crate::error::Result;
use crate::handle::{NodeHandle, ParamHandle};
use crate::node::{
    ChannelCountMode, NodeConfig, OutputChannelPolicy, ProcessArgs, Processor, RenderContext,
};
use crate::param::Param;

const PARAM_PAN: usize = 0;

struct PannerProcessor;

impl Processor for PannerProcessor {
    fn process(&mut self, args: ProcessArgs<'_>, _ctx: &RenderContext<'_>) {
        let input = args.inputs.bus(0);
        let pan = &args.params[PARAM_PAN];
        let output = &mut args.outputs[0].bus;

        if input.is_silent() {
            output.zero();
            return;
        }

        let stereo_input = input.number_of_channels() > 1;
        let frames = args.frames;

        for side in [CHANNEL_LEFT, CHANNEL_RIGHT] {
            let source = if stereo_input {
                input.channel(side)
            } else {
                input.channel(0)
            };
            let data = output.channel_mut(side).data_mut();
            for i in 0..frames {
                let angle = (pan.sample(i).clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
                let gain = if side == CHANNEL_LEFT {
                    angle.cos()
                } else {
                    angle.sin()
                };
                data[i] = source.data()[i] * gain;
            }
        }
    }

    fn name(&self) -> &'static str {
        "Panner"
    }
}

/// An equal-power stereo panner.
pub struct PannerNode {
    handle: NodeHandle,
}

impl PannerNode {
    pub fn new(context: &Arc<Context>) -> Result<Self> {
        let sample_rate = context.sample_rate();
        let id = context.register(
            Box::new(PannerProcessor),
            NodeConfig {
                inputs: vec![1],
                outputs: vec![2],
                params: vec![Param::new("pan", 0.0, -1.0, 1.0)],
                channel_count: 2,
                channel_count_mode: ChannelCountMode::ClampedMax,
                interpretation: ChannelInterpretation::Speakers,
                channel_policy: OutputChannelPolicy::Fixed,
                sample_rate,
            },
            RegisterOptions::default(),
        )?;
        Ok(Self {
            handle: NodeHandle::new(Arc::clone(context), id),
        })
    }

    pub fn pan(&self) -> Result<ParamHandle> {
        self.handle.param("pan")
    }
}

impl Deref for PannerNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.handle
    }
}
