//! Single-channel sample storage with silence tracking
//!
//! An [`AudioChannel`] is a fixed-length run of f32 samples plus a silent
//! flag. The flag lets the render path skip whole subgraphs: a silent
//! channel is known to be all zeros without scanning it, and copies from a
//! silent source degrade to a cheap zero fill.

use crate::dsp;

/// One channel of audio data.
///
/// The silent flag is an invariant, not a hint: when `silent` is true every
/// sample is 0.0. Any mutable access to the data clears the flag.
pub struct AudioChannel {
    data: Vec<f32>,
    silent: bool,
}

impl AudioChannel {
    /// Create a zeroed (silent) channel holding `length` frames.
    pub fn new(length: usize) -> Self {
        Self {
            data: vec![0.0; length],
            silent: true,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Read access to the samples.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable access to the samples. Clears the silent flag, since the
    /// caller is assumed to write real signal.
    pub fn data_mut(&mut self) -> &mut [f32] {
        self.silent = false;
        &mut self.data
    }

    /// Zero the channel and mark it silent.
    pub fn zero(&mut self) {
        if self.silent {
            return;
        }
        self.data.fill(0.0);
        self.silent = true;
    }

    /// Mark the channel silent without touching the data. Only valid when
    /// the caller has already written zeros everywhere.
    pub fn mark_silent(&mut self) {
        debug_assert!(self.data.iter().all(|s| *s == 0.0));
        self.silent = true;
    }

    /// Replace this channel's contents with `source`. A silent source
    /// zeroes the destination instead of copying stale data.
    pub fn copy_from(&mut self, source: &AudioChannel) {
        debug_assert_eq!(self.len(), source.len(), "channel length mismatch");
        if source.silent {
            self.zero();
            return;
        }
        self.data_mut().copy_from_slice(source.data());
    }

    /// Add `source` into this channel. Silent sources contribute nothing.
    pub fn sum_from(&mut self, source: &AudioChannel) {
        debug_assert_eq!(self.len(), source.len(), "channel length mismatch");
        if source.silent {
            return;
        }
        dsp::vacc(source.data(), self.data_mut());
    }

    /// Multiply every sample by `scale`.
    pub fn scale(&mut self, scale: f32) {
        if self.silent {
            return;
        }
        for sample in self.data.iter_mut() {
            *sample *= scale;
        }
    }

    /// Grow or shrink the channel to `length` frames, zeroed.
    pub fn resize(&mut self, length: usize) {
        self.data.clear();
        self.data.resize(length, 0.0);
        self.silent = true;
    }
}
