//! Bounded f32 FIFO between the device callback and the render path
//!
//! The capture side of the device adapter produces samples at the host's
//! cadence while the graph consumes them 128 frames at a time. This buffer
//! absorbs the rate mismatch. It is written for a single producer and a
//! single consumer and is never locked on the render path.
//!
//! Overrun policy: pushing into a full buffer discards the *oldest* queued
//! samples, so after any sequence of pushes the buffer holds the newest
//! `capacity` samples in arrival order.

/// Fixed-capacity single-producer/single-consumer sample FIFO.
pub struct RingBuffer {
    data: Vec<f32>,
    read: usize,
    count: usize,
}

impl RingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            data: vec![0.0; capacity],
            read: 0,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Samples queued and ready to pop.
    pub fn available_for_reading(&self) -> usize {
        self.count
    }

    /// Free space before the next push starts discarding old samples.
    pub fn available_for_writing(&self) -> usize {
        self.capacity() - self.count
    }

    /// Append `samples`, discarding the oldest queued data on overflow.
    /// Returns how many previously queued or incoming samples were dropped.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        let capacity = self.capacity();
        let mut dropped = 0;

        // More incoming than the buffer can ever hold: only the newest
        // `capacity` samples can survive.
        let source = if samples.len() > capacity {
            dropped += samples.len() - capacity;
            &samples[samples.len() - capacity..]
        } else {
            samples
        };

        // Make room by discarding from the read end.
        let overflow = (self.count + source.len()).saturating_sub(capacity);
        if overflow > 0 {
            self.read = (self.read + overflow) % capacity;
            self.count -= overflow;
            dropped += overflow;
        }

        let write = (self.read + self.count) % capacity;
        let first = (capacity - write).min(source.len());
        self.data[write..write + first].copy_from_slice(&source[..first]);
        if first < source.len() {
            let rest = source.len() - first;
            self.data[..rest].copy_from_slice(&source[first..]);
        }
        self.count += source.len();

        dropped
    }

    /// Pop up to `out.len()` samples in FIFO order. Returns how many were
    /// actually written; the tail of `out` is left untouched on a short
    /// read, so callers decide how to pad.
    pub fn pop(&mut self, out: &mut [f32]) -> usize {
        let amount = out.len().min(self.available_for_reading());
        let capacity = self.capacity();

        let first = (capacity - self.read).min(amount);
        out[..first].copy_from_slice(&self.data[self.read..self.read + first]);
        if first < amount {
            out[first..amount].copy_from_slice(&self.data[..amount - first]);
        }

        self.read = (self.read + amount) % capacity;
        self.count -= amount;
        amount
    }

    /// Drop everything queued.
    pub fn clear(&mut self) {
        self.read = 0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_then_pop_round_trips_in_order() {
        let mut ring = RingBuffer::with_capacity(8);
        assert_eq!(ring.push(&[1.0, 2.0, 3.0]), 0);
        assert_eq!(ring.available_for_reading(), 3);
        assert_eq!(ring.available_for_writing(), 5);

        let mut out = [0.0; 3];
        assert_eq!(ring.pop(&mut out), 3);
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert_eq!(ring.available_for_reading(), 0);
    }

    #[test]
    fn test_pop_is_bounded_by_available() {
        let mut ring = RingBuffer::with_capacity(4);
        ring.push(&[1.0, 2.0]);

        let mut out = [9.0; 4];
        assert_eq!(ring.pop(&mut out), 2);
        assert_eq!(&out[..2], &[1.0, 2.0]);
        // Tail untouched: padding is the caller's decision.
        assert_eq!(&out[2..], &[9.0, 9.0]);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let mut ring = RingBuffer::with_capacity(4);
        ring.push(&[1.0, 2.0, 3.0]);
        let mut out = [0.0; 2];
        ring.pop(&mut out);

        // Write crosses the physical end of the storage.
        ring.push(&[4.0, 5.0, 6.0]);
        let mut rest = [0.0; 4];
        assert_eq!(ring.pop(&mut rest), 4);
        assert_eq!(rest, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_overrun_keeps_newest_capacity_samples() {
        let mut ring = RingBuffer::with_capacity(4);
        let samples: Vec<f32> = (0..7).map(|i| i as f32).collect();

        let dropped = ring.push(&samples);
        assert_eq!(dropped, 3);

        let mut out = [0.0; 4];
        assert_eq!(ring.pop(&mut out), 4);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_incremental_overrun_discards_oldest() {
        let mut ring = RingBuffer::with_capacity(4);
        ring.push(&[1.0, 2.0, 3.0, 4.0]);
        let dropped = ring.push(&[5.0, 6.0]);
        assert_eq!(dropped, 2);

        let mut out = [0.0; 4];
        assert_eq!(ring.pop(&mut out), 4);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_clear_empties_the_buffer() {
        let mut ring = RingBuffer::with_capacity(4);
        ring.push(&[1.0, 2.0]);
        ring.clear();
        assert_eq!(ring.available_for_reading(), 0);
        assert_eq!(ring.available_for_writing(), 4);
    }
}
