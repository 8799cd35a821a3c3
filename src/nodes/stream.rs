//! Streaming source - client-fed or capture-fed audio
//!
//! A scheduled source whose frames come from outside the graph. With a
//! callback installed, the callback fills each quantum's live window on
//! the render thread (it must not block or allocate). Without one, the
//! node forwards the context's capture input, which is how microphone
//! audio enters the graph.

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use crate::bus::{AudioBus, ChannelInterpretation};
use crate::context::{Context, RegisterOptions};
use crate::error::Result;
use crate::handle::NodeHandle;
use crate::node::{
    ChannelCountMode, NodeConfig, OutputChannelPolicy, ProcessArgs, Processor, RenderContext,
};
use crate::nodes::SourceControl;
use crate::scheduled::{PlaybackState, ScheduledBehavior};

/// Fills `bus` for the live region `[offset, offset + frames)` of the
/// current quantum. Runs on the render thread.
pub type StreamCallback = Box<dyn FnMut(&mut AudioBus, usize, usize) + Send>;

struct StreamProcessor {
    behavior: ScheduledBehavior,
    callback: Arc<Mutex<Option<StreamCallback>>>,
}

impl Processor for StreamProcessor {
    fn process(&mut self, args: ProcessArgs<'_>, ctx: &RenderContext<'_>) {
        let window = self.behavior.update(args.node, args.outputs, ctx);
        if window.is_silent() {
            return;
        }

        let output = &mut args.outputs[0].bus;

        // try_lock: a client mid-swap must not stall the render thread;
        // the block degrades to silence instead.
        match self.callback.try_lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(callback) => callback(output, window.offset, window.frames),
                None => {
                    // No callback: forward device capture.
                    match ctx.capture {
                        Some(capture) => {
                            for ch in 0..output.number_of_channels() {
                                let source = capture.channel(ch.min(
                                    capture.number_of_channels() - 1,
                                ));
                                let data = output.channel_mut(ch).data_mut();
                                let span = window.offset..window.offset + window.frames;
                                data[span.clone()].copy_from_slice(&source.data()[span]);
                            }
                        }
                        None => output.zero(),
                    }
                }
            },
            Err(_) => output.zero(),
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
        "Stream"
    }
}

/// A scheduled source fed by a client callback or by device capture.
pub struct StreamNode {
    handle: NodeHandle,
    callback: Arc<Mutex<Option<StreamCallback>>>,
}

impl StreamNode {
    pub fn new(context: &Arc<Context>, channels: usize) -> Result<Self> {
        let sample_rate = context.sample_rate();
        let callback: Arc<Mutex<Option<StreamCallback>>> = Arc::new(Mutex::new(None));

        let processor = StreamProcessor {
            behavior: ScheduledBehavior::new(),
            callback: Arc::clone(&callback),
        };

        let id = context.register(
            Box::new(processor),
            NodeConfig {
                inputs: Vec::new(),
                outputs: vec![channels],
                params: Vec::new(),
                channel_count: channels,
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
            callback,
        })
    }

    /// Install the fill callback. Replaces any existing one.
    pub fn set_callback(&self, callback: StreamCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    /// Remove the callback; the node falls back to device capture.
    pub fn clear_callback(&self) {
        *self.callback.lock().unwrap() = None;
    }
}

impl Deref for StreamNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.handle
    }
}

impl SourceControl for StreamNode {}
