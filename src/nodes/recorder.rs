//! Recorder node - captures the signal flowing through it
//!
//! Passes its input through unchanged while accumulating a mono mixdown.
//! Registered as an automatic pull candidate, so it keeps recording even
//! when nothing is connected downstream of it. The captured samples can
//! be taken as a buffer or written out as a 32-bit float WAV.

use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::bus::ChannelInterpretation;
use crate::codec::encode_wav_file;
use crate::context::{Context, RegisterOptions};
use crate::error::Result;
use crate::handle::NodeHandle;
use crate::node::{
    ChannelCountMode, NodeConfig, OutputChannelPolicy, ProcessArgs, Processor, RenderContext,
};

/// Recording capacity reserved up front, in seconds, so steady-state
/// recording rarely reallocates on the render thread.
const PREALLOCATED_SECONDS: usize = 10;

struct RecorderProcessor {
    samples: Arc<Mutex<Vec<f32>>>,
    recording: Arc<AtomicBool>,
}

impl Processor for RecorderProcessor {
    fn process(&mut self, args: ProcessArgs<'_>, _ctx: &RenderContext<'_>) {
        let input = args.inputs.bus(0);
        args.outputs[0]
            .bus
            .copy_from(input, ChannelInterpretation::Speakers);

        if !self.recording.load(Ordering::Relaxed) {
            return;
        }

        // try_lock: if the client is busy taking the buffer, drop this
        // block rather than stall the render thread.
        let Ok(mut samples) = self.samples.try_lock() else {
            return;
        };
        let channels = input.number_of_channels();
        let scale = 1.0 / channels as f32;
        for i in 0..args.frames {
            let mut mixed = 0.0;
            for ch in 0..channels {
                mixed += input.channel(ch).data()[i];
            }
            samples.push(mixed * scale);
        }
    }

    /// Record timeline gaps too: silence is signal for a recorder.
    fn propagates_silence(&self, _last: f64, _now: f64) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "Recorder"
    }
}

/// A pass-through node capturing a mono mixdown of its input.
pub struct RecorderNode {
    handle: NodeHandle,
    samples: Arc<Mutex<Vec<f32>>>,
    recording: Arc<AtomicBool>,
}

impl RecorderNode {
    pub fn new(context: &Arc<Context>, channels: usize) -> Result<Self> {
        let sample_rate = context.sample_rate();
        let samples = Arc::new(Mutex::new(Vec::with_capacity(
            sample_rate as usize * PREALLOCATED_SECONDS,
        )));
        let recording = Arc::new(AtomicBool::new(false));

        let processor = RecorderProcessor {
            samples: Arc::clone(&samples),
            recording: Arc::clone(&recording),
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
            samples,
            recording,
        })
    }

    pub fn start(&self) {
        self.recording.store(true, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.recording.store(false, Ordering::Relaxed);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    pub fn recorded_frames(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.recorded_frames() as f64 / self.handle.context().sample_rate()
    }

    /// Take the recording, leaving the node empty for the next take.
    pub fn take_recording(&self) -> Vec<f32> {
        std::mem::take(&mut *self.samples.lock().unwrap())
    }

    /// Write the recording as a 32-bit float WAV at the context rate and
    /// clear it.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let samples = self.take_recording();
        let sample_rate = self.handle.context().sample_rate() as u32;
        encode_wav_file(path, &samples, sample_rate)?;
        debug!(frames = samples.len(), path = %path.display(), "recording written");
        Ok(())
    }
}

impl Deref for RecorderNode {
    type Target = NodeHandle;

    fn deref(&self) -> &NodeHandle {
        &self.handle
    }
}
