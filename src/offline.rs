//! Offline rendering - drive the graph without a device
//!
//! Pulls the destination at block rate under a synthetic clock, applying
//! deferred graph edits between quanta the way the update thread would
//! under a live clock (disconnect fades progress in audio time). This is
//! the backbone of the test suite and of render-to-file workflows.

use std::path::Path;
use std::sync::Arc;

use crate::bus::AudioBus;
use crate::codec::encode_wav_file;
use crate::context::Context;
use crate::error::Result;
use crate::RENDER_QUANTUM_FRAMES;

pub struct OfflineRenderer {
    context: Arc<Context>,
    quantum: AudioBus,
}

impl OfflineRenderer {
    /// Take over rendering for `context`. Pair with
    /// [`Context::new_offline`](Context::new_offline), which skips the
    /// wall-clock update thread this renderer replaces.
    pub fn new(context: Arc<Context>) -> Self {
        context.initialize();
        let quantum = AudioBus::new(
            context.config().output_channels,
            RENDER_QUANTUM_FRAMES,
            context.sample_rate(),
        );
        Self { context, quantum }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Render `frames` frames of the destination into a fresh bus.
    pub fn render(&mut self, frames: usize) -> AudioBus {
        let channels = self.quantum.number_of_channels();
        let mut out = AudioBus::new(channels, frames.max(1), self.context.sample_rate());
        let quantum_seconds = RENDER_QUANTUM_FRAMES as f64 / self.context.sample_rate();

        let mut written = 0;
        while written < frames {
            self.context.update_pass(quantum_seconds);
            self.context.render_quantum(&mut self.quantum, None);

            let n = (frames - written).min(RENDER_QUANTUM_FRAMES);
            for ch in 0..channels {
                let source = &self.quantum.channel(ch).data()[..n];
                out.channel_mut(ch).data_mut()[written..written + n].copy_from_slice(source);
            }
            written += n;
        }
        out
    }

    /// Render whole quanta, discarding the audio. Useful to advance the
    /// clock past scheduled events.
    pub fn run_quanta(&mut self, quanta: usize) {
        for _ in 0..quanta {
            let quantum_seconds = RENDER_QUANTUM_FRAMES as f64 / self.context.sample_rate();
            self.context.update_pass(quantum_seconds);
            self.context.render_quantum(&mut self.quantum, None);
        }
    }

    /// The destination bus of the most recently rendered quantum.
    pub fn last_quantum_bus(&self) -> &AudioBus {
        &self.quantum
    }

    /// Render `seconds` of audio and write a mono mixdown WAV.
    pub fn render_to_wav(&mut self, path: &Path, seconds: f64) -> Result<()> {
        let sample_rate = self.context.sample_rate();
        let frames = (seconds * sample_rate).round() as usize;
        let bus = self.render(frames);

        let channels = bus.number_of_channels();
        let scale = 1.0 / channels as f32;
        let mut mix = vec![0.0f32; frames];
        for ch in 0..channels {
            let data = bus.channel(ch).data();
            for (i, sample) in mix.iter_mut().enumerate() {
                *sample += data[i] * scale;
            }
        }
        encode_wav_file(path, &mix, sample_rate as u32)
    }
}
