//! Start/stop scheduling shared by source nodes
//!
//! Source nodes (player, oscillator, noise, stream) embed a
//! [`ScheduledBehavior`] that turns wall-clock `play`/`stop` requests into
//! frame-accurate render windows. Each quantum the source asks the
//! behavior which slice of the block is live; the behavior zeroes the
//! leading and trailing regions itself, and the source fills the middle.

use crate::dispatcher::{EngineEvent, EventSender, FinishedCallback};
use crate::node::{NodeId, NodeOutput, RenderContext};

/// Time value meaning "not scheduled".
const UNSCHEDULED_TIME: f64 = f64::INFINITY;

/// Lifecycle of a scheduled source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Unscheduled,
    Scheduled,
    Playing,
    Finished,
}

/// The live slice of the current quantum for a playing source.
#[derive(Debug, Clone, Copy)]
pub struct RenderWindow {
    /// First live frame within the quantum.
    pub offset: usize,
    /// Number of live frames; zero means the whole quantum is silent.
    pub frames: usize,
    /// The committed end time falls inside this quantum; the source must
    /// finish after filling the window.
    pub ends_this_quantum: bool,
}

impl RenderWindow {
    pub fn silent() -> Self {
        Self {
            offset: 0,
            frames: 0,
            ends_this_quantum: false,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.frames == 0
    }
}

pub struct ScheduledBehavior {
    state: PlaybackState,
    pending_start_time: Option<f64>,
    pending_end_time: Option<f64>,
    start_time: f64,
    end_time: f64,
    on_ended: Option<FinishedCallback>,
}

impl Default for ScheduledBehavior {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduledBehavior {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Unscheduled,
            pending_start_time: None,
            pending_end_time: None,
            start_time: UNSCHEDULED_TIME,
            end_time: UNSCHEDULED_TIME,
            on_ended: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// The committed or pending start time, if any.
    pub fn start_time(&self) -> f64 {
        self.pending_start_time.unwrap_or(self.start_time)
    }

    /// Schedule playback to begin at absolute context time `at`. Ignored
    /// unless the source is unscheduled; a finished source must be reset
    /// first.
    pub fn play(&mut self, at: f64) {
        if self.state != PlaybackState::Unscheduled {
            return;
        }
        self.pending_start_time = Some(at.max(0.0));
        self.state = PlaybackState::Scheduled;
    }

    /// Schedule playback to end at absolute context time `at`.
    pub fn stop(&mut self, at: f64) {
        if matches!(self.state, PlaybackState::Unscheduled | PlaybackState::Finished) {
            return;
        }
        self.pending_end_time = Some(at.max(0.0));
    }

    /// Return to the unscheduled state so the source can be played again.
    pub fn reset(&mut self) {
        self.state = PlaybackState::Unscheduled;
        self.pending_start_time = None;
        self.pending_end_time = None;
        self.start_time = UNSCHEDULED_TIME;
        self.end_time = UNSCHEDULED_TIME;
        self.on_ended = None;
    }

    pub fn set_on_ended(&mut self, callback: FinishedCallback) {
        self.on_ended = Some(callback);
    }

    /// Move to the finished state and hand the completion callback to the
    /// dispatcher. Safe to call more than once; only the first transition
    /// emits an event.
    pub fn finish(&mut self, node: NodeId, events: &EventSender) {
        if self.state == PlaybackState::Finished {
            return;
        }
        self.state = PlaybackState::Finished;
        let callback = self.on_ended.take();
        let _ = events.send(EngineEvent::SourceFinished { node, callback });
    }

    /// Per-quantum scheduling: promote pending times, derive the live
    /// window, and zero the dead regions of every output channel.
    ///
    /// Call once at the top of `process`. When the returned window is
    /// silent the outputs are already zeroed and there is nothing to fill;
    /// when `ends_this_quantum` is set the source must call
    /// [`finish`](Self::finish) after filling the window.
    pub fn update(
        &mut self,
        node: NodeId,
        outputs: &mut [NodeOutput],
        ctx: &RenderContext<'_>,
    ) -> RenderWindow {
        // Pending times commit exactly once.
        if let Some(t) = self.pending_start_time.take() {
            self.start_time = t;
        }
        if let Some(t) = self.pending_end_time.take() {
            self.end_time = t;
        }

        if matches!(self.state, PlaybackState::Unscheduled | PlaybackState::Finished) {
            zero_all(outputs);
            return RenderWindow::silent();
        }

        let quantum_start = ctx.current_frame;
        let quantum_frames = ctx.frames as u64;

        let start_frame = (self.start_time * ctx.sample_rate).round() as u64;
        let end_frame = if self.end_time.is_finite() {
            (self.end_time * ctx.sample_rate).round() as u64
        } else {
            u64::MAX
        };

        // The whole scheduled range already elapsed.
        if end_frame <= quantum_start {
            zero_all(outputs);
            self.finish(node, ctx.events);
            return RenderWindow::silent();
        }

        // Start lies beyond this quantum.
        if start_frame >= quantum_start + quantum_frames {
            zero_all(outputs);
            return RenderWindow::silent();
        }

        if self.state == PlaybackState::Scheduled {
            self.state = PlaybackState::Playing;
        }

        let offset = start_frame.saturating_sub(quantum_start) as usize;
        let mut frames = ctx.frames - offset;
        let mut ends_this_quantum = false;

        if end_frame < quantum_start + quantum_frames {
            let end_offset = (end_frame - quantum_start) as usize;
            frames = end_offset.saturating_sub(offset);
            ends_this_quantum = true;
        }

        if frames == 0 {
            zero_all(outputs);
            if ends_this_quantum {
                self.finish(node, ctx.events);
            }
            return RenderWindow::silent();
        }

        // Zero the dead regions; the source fills [offset, offset+frames).
        for output in outputs.iter_mut() {
            for ch in 0..output.bus.number_of_channels() {
                let data = output.bus.channel_mut(ch).data_mut();
                data[..offset].fill(0.0);
                data[offset + frames..].fill(0.0);
            }
        }

        RenderWindow {
            offset,
            frames,
            ends_this_quantum,
        }
    }
}

fn zero_all(outputs: &mut [NodeOutput]) {
    for output in outputs.iter_mut() {
        output.bus.zero();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::event_channel;
    use crate::RENDER_QUANTUM_FRAMES;

    const RATE: f64 = 44_100.0;

    fn ctx_for_frame<'a>(frame: u64, events: &'a EventSender) -> RenderContext<'a> {
        RenderContext {
            current_time: frame as f64 / RATE,
            current_frame: frame,
            sample_rate: RATE,
            frames: RENDER_QUANTUM_FRAMES,
            events,
            capture: None,
        }
    }

    #[test]
    fn test_state_machine_walks_through_lifecycle() {
        let (tx, rx) = event_channel();
        let mut behavior = ScheduledBehavior::new();
        let mut outputs = vec![NodeOutput::new(1, RATE)];

        assert_eq!(behavior.state(), PlaybackState::Unscheduled);

        behavior.play(0.0);
        assert_eq!(behavior.state(), PlaybackState::Scheduled);

        let window = behavior.update(0, &mut outputs, &ctx_for_frame(0, &tx));
        assert_eq!(behavior.state(), PlaybackState::Playing);
        assert_eq!(window.offset, 0);
        assert_eq!(window.frames, RENDER_QUANTUM_FRAMES);

        behavior.stop(0.0);
        let window = behavior.update(0, &mut outputs, &ctx_for_frame(128, &tx));
        assert!(window.is_silent());
        assert_eq!(behavior.state(), PlaybackState::Finished);
        assert!(rx.try_recv().is_ok(), "finish must emit an event");

        behavior.reset();
        assert_eq!(behavior.state(), PlaybackState::Unscheduled);
    }

    #[test]
    fn test_start_offset_is_frame_accurate() {
        let (tx, _rx) = event_channel();
        let mut behavior = ScheduledBehavior::new();
        let mut outputs = vec![NodeOutput::new(1, RATE)];

        // 0.01 s at 44.1 kHz = frame 441 = quantum 3, offset 57.
        behavior.play(0.01);

        let window = behavior.update(0, &mut outputs, &ctx_for_frame(0, &tx));
        assert!(window.is_silent());

        let window = behavior.update(0, &mut outputs, &ctx_for_frame(384, &tx));
        assert_eq!(window.offset, 57);
        assert_eq!(window.frames, RENDER_QUANTUM_FRAMES - 57);
    }

    #[test]
    fn test_end_inside_quantum_trims_and_finishes() {
        let (tx, rx) = event_channel();
        let mut behavior = ScheduledBehavior::new();
        let mut outputs = vec![NodeOutput::new(1, RATE)];

        behavior.play(0.0);
        behavior.update(0, &mut outputs, &ctx_for_frame(0, &tx));

        // Stop mid-quantum: 192 frames = one and a half quanta.
        behavior.stop(192.0 / RATE);
        let window = behavior.update(0, &mut outputs, &ctx_for_frame(128, &tx));
        assert_eq!(window.offset, 0);
        assert_eq!(window.frames, 64);
        assert!(window.ends_this_quantum);

        behavior.finish(0, &tx);
        assert_eq!(behavior.state(), PlaybackState::Finished);
        assert_eq!(rx.try_iter().count(), 1, "finish fires exactly once");
    }

    #[test]
    fn test_finished_source_stays_silent_until_reset() {
        let (tx, _rx) = event_channel();
        let mut behavior = ScheduledBehavior::new();
        let mut outputs = vec![NodeOutput::new(1, RATE)];

        behavior.play(0.0);
        behavior.update(0, &mut outputs, &ctx_for_frame(0, &tx));
        behavior.finish(0, &tx);

        // Playing again without reset is ignored.
        behavior.play(0.0);
        let window = behavior.update(0, &mut outputs, &ctx_for_frame(128, &tx));
        assert!(window.is_silent());
        assert!(outputs[0].bus.is_silent());

        behavior.reset();
        behavior.play(128.0 / RATE);
        let window = behavior.update(0, &mut outputs, &ctx_for_frame(128, &tx));
        assert_eq!(window.frames, RENDER_QUANTUM_FRAMES);
    }
}
