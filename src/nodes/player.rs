//! Audio player - scheduled playback of a decoded buffer
//!
//! Plays an [`AudioBuffer`] through the scheduling state machine, with
//! linear interpolation when the buffer's sample rate differs from the
//! context's. Playback finishes when the buffer runs out (unless looping)
//! or at the scheduled stop time, whichever comes first.

use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bus::ChannelInterpretation;
use crate::codec::{decode_wav_file, AudioBuffer};
use crate::context::{Context, RegisterOptions};
use crate::error::Result;
use crate::handle::NodeHandle;
use crate::node::{
    ChannelCountMode, NodeConfig, OutputChannelPolicy, ProcessArgs, Processor, RenderContext,
};
use crate::nodes::SourceControl;
use crate::scheduled::{PlaybackState, ScheduledBehavior};

struct PlayerProcessor {
    behavior: ScheduledBehavior,
    buffer: Arc<AudioBuffer>,
    /// Fractional playhead in buffer frames.
    position: f64,
    /// Buffer frames consumed per context frame.
    step: f64,
    looping: Arc<AtomicBool>,
}

impl Processor for PlayerProcessor {
    fn process(&mut self, args: ProcessArgs<'_>, ctx: &RenderContext<'_>) {
        let window = self.behavior.update(args.node, args.outputs, ctx);
        if window.is_silent() {
            return;
        }

        let buffer_frames = self.buffer.frames();
        if buffer_frames == 0 || self.buffer.channels.is_empty() {
            // Nothing to play (e.g. a failed decode swapped in silence).
            args.outputs[0].bus.zero();
            self.behavior.finish(args.node, ctx.events);
            return;
        }
        let looping = self.looping.load(Ordering::Relaxed);
        let channels = args.outputs[0].bus.number_of_channels();
        let start_position = self.position;
        let mut end_position = start_position;
        let mut exhausted = false;

        for ch in 0..channels {
            let source = &self.buffer.channels[ch.min(self.buffer.channels.len() - 1)];
            let data = args.outputs[0].bus.channel_mut(ch).data_mut();
            let mut position = start_position;

            for i in window.offset..window.offset + window.frames {
                let index = position as usize;
                if index >= buffer_frames {
                    if looping && buffer_frames > 0 {
                        position -= buffer_frames as f64;
                        data[i] = source[position as usize];
                    } else {
                        data[i..window.offset + window.frames].fill(0.0);
                        exhausted = true;
                        break;
                    }
                } else {
                    // Linear interpolation across the rate mismatch.
                    let frac = (position - index as f64) as f32;
                    let a = source[index];
                    let b = if index + 1 < buffer_frames {
                        source[index + 1]
                    } else if looping {
                        source[0]
                    } else {
                        a
                    };
                    data[i] = a * (1.0 - frac) + b * frac;
                }
                position += self.step;
            }
            end_position = position;
        }

        self.position = end_position;

        if exhausted || window.ends_this_quantum {
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
        self.position = 0.0;
    }

    fn scheduled(&self) -> Option<&ScheduledBehavior> {
        Some(&self.behavior)
    }

    fn scheduled_mut(&mut self) -> Option<&mut ScheduledBehavior> {
        Some(&mut self.behavior)
    }

    fn name(&self) -> &'static str {
        "AudioPlayer"
    }
}

/// A scheduled source playing a decoded audio buffer.
pub struct AudioPlayer {
    handle: NodeHandle,
    looping: Arc<AtomicBool>,
    buffer: Arc<AudioBuffer>,
}

impl AudioPlayer {
    /// Create a player for an already decoded buffer.
    pub fn new(context: &Arc<Context>, buffer: AudioBuffer) -> Result<Self> {
        let sample_rate = context.sample_rate();
        let buffer = Arc::new(buffer);
        let looping = Arc::new(AtomicBool::new(false));
        let channels = buffer.number_of_channels().max(1);

        let processor = PlayerProcessor {
            behavior: ScheduledBehavior::new(),
            buffer: Arc::clone(&buffer),
            position: 0.0,
            step: buffer.sample_rate as f64 / sample_rate,
            looping: Arc::clone(&looping),
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
            looping,
            buffer,
        })
    }

    /// Create a player by decoding a WAV file. Decode failures surface
    /// here; a constructed player never errors on the render path.
    pub fn from_wav_file(context: &Arc<Context>, path: &Path) -> Result<Self> {
        let buffer = decode_wav_file(path)?;
        Self::new(context, buffer)
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Relaxed);
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    pub fn duration_seconds(&self) -> f64 {
        self.buffer.duration_seconds()
    }
}

impl Deref for AudioPlayer {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.handle
    }
}

impl SourceControl for AudioPlayer {}
