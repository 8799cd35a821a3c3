//! Concrete node implementations
//!
//! Each node type pairs a client-facing handle struct (constructed against
//! a context, deref'ing to [`NodeHandle`]) with a private processor that
//! runs on the render thread.

pub mod destination;
pub mod gain;
pub mod metering;
pub mod noise;
pub mod oscillator;
pub mod panner;
pub mod player;
pub mod recorder;
pub mod stream;

pub use gain::GainNode;
pub use metering::MeteringNode;
pub use noise::NoiseNode;
pub use oscillator::{OscillatorNode, Waveform};
pub use panner::PannerNode;
pub use player::AudioPlayer;
pub use recorder::RecorderNode;
pub use stream::{StreamCallback, StreamNode};

use crate::error::Result;
use crate::handle::NodeHandle;
use crate::scheduled::PlaybackState;

/// Transport control shared by every scheduled source node.
///
/// `after` values are offsets in seconds from the context's current time;
/// passing `0.0` means "as soon as possible", which lands on the next
/// quantum boundary.
pub trait SourceControl: std::ops::Deref<Target = NodeHandle> {
    /// Schedule playback to start `after` seconds from now.
    fn play(&self, after: f64) -> Result<()> {
        let at = self.context().current_time() + after.max(0.0);
        self.context().schedule_play(self.id(), at, None)
    }

    /// Schedule playback and register a completion callback, delivered via
    /// [`Context::drain_events`](crate::context::Context::drain_events)
    /// when the source finishes.
    fn play_with(&self, after: f64, on_ended: impl FnOnce() + Send + 'static) -> Result<()> {
        let at = self.context().current_time() + after.max(0.0);
        self.context()
            .schedule_play(self.id(), at, Some(Box::new(on_ended)))
    }

    /// Schedule playback to stop `after` seconds from now.
    fn stop(&self, after: f64) -> Result<()> {
        let at = self.context().current_time() + after.max(0.0);
        self.context().schedule_stop(self.id(), at)
    }

    /// Return a finished source to the unscheduled state so it can play
    /// again.
    fn reset(&self) -> Result<()> {
        self.context().schedule_reset(self.id())
    }

    fn playback_state(&self) -> PlaybackState {
        self.context()
            .playback_state_of(self.id())
            .unwrap_or(PlaybackState::Unscheduled)
    }
}
