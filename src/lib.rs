//! # Polaron - Realtime Audio Processing Graph
//!
//! Polaron is a pull-based audio engine modeled on the Web Audio rendering
//! model. Client code assembles a directed graph of processing nodes -
//! sources, effects, inspectors, a hardware destination - and the device
//! callback pulls fixed 128-frame blocks from the destination, which
//! recursively pulls everything upstream, so the whole graph is evaluated
//! exactly once per block at the device's cadence.
//!
//! ## Core Features
//!
//! - **Pull-based block rendering**: allocation-free at steady state, with
//!   silence propagation so idle subgraphs cost nothing
//! - **Deferred graph edits**: connects and disconnects queue through an
//!   update thread and surface only at quantum boundaries; disconnects
//!   crossfade instead of clicking
//! - **Sample-accurate automation**: set/linear/exponential parameter
//!   timelines plus audio-rate modulation of any parameter
//! - **Scheduled sources**: frame-accurate start/stop with completion
//!   callbacks delivered off the render thread
//! - **Device bridge**: cpal output/capture behind a ring buffer, mapping
//!   arbitrary host buffer sizes onto the fixed internal block
//!
//! ## Quick Start
//!
//! ### An oscillator through a gain
//!
//! ```no_run
//! use polaron::{AudioDevice, Context, GainNode, OscillatorNode, SourceControl, Waveform};
//!
//! let context = Context::shared();
//! let device = AudioDevice::start(context.clone()).expect("audio device");
//!
//! let osc = OscillatorNode::new(&context, Waveform::Sine, 440.0).unwrap();
//! let gain = GainNode::new(&context, 0.5).unwrap();
//!
//! osc.connect(&gain).unwrap();
//! gain.connect_to_destination().unwrap();
//! osc.play(0.0).unwrap();
//!
//! std::thread::sleep(std::time::Duration::from_secs(2));
//! drop(device);
//! ```
//!
//! ### Parameter automation
//!
//! ```no_run
//! use polaron::{Context, GainNode};
//!
//! let context = Context::shared();
//! let gain = GainNode::new(&context, 1.0).unwrap();
//!
//! // Fade to silence over 20 ms, sample accurately.
//! let param = gain.gain().unwrap();
//! param.set_value_at_time(1.0, context.current_time()).unwrap();
//! param
//!     .linear_ramp_to_value_at_time(0.0, context.current_time() + 0.02)
//!     .unwrap();
//! ```
//!
//! ### Offline rendering
//!
//! ```no_run
//! use polaron::{Context, ContextConfig, OfflineRenderer, OscillatorNode, SourceControl, Waveform};
//!
//! let context = Context::new_offline(ContextConfig::default());
//! let osc = OscillatorNode::new(&context, Waveform::Sine, 220.0).unwrap();
//! osc.connect_to_destination().unwrap();
//! osc.play(0.0).unwrap();
//!
//! let mut renderer = OfflineRenderer::new(context);
//! let bus = renderer.render(44_100); // one second
//! assert_eq!(bus.length(), 44_100);
//! ```
//!
//! ## Architecture
//!
//! - [`context`] - graph ownership, the two-lock discipline, the update
//!   loop (start here)
//! - [`node`] - the processor trait, node registry, and pull protocol
//! - [`bus`] / [`buffer`] - multi-channel sample blocks with silence
//!   tracking and de-zippered gain
//! - [`param`] / [`timeline`] - automation parameters and their event
//!   timelines
//! - [`scheduled`] - the start/stop state machine shared by sources
//! - [`nodes`] - gain, panner, player, oscillator, noise, stream,
//!   recorder, metering, destination
//! - [`device`] - the cpal adapter
//! - [`offline`] - device-less rendering for tests and bounces
//!
//! ## Threading Model
//!
//! Three thread roles. Client threads edit the graph through context
//! handles; a dedicated update thread applies queued edits under the graph
//! lock; the device's realtime thread renders under the render lock. The
//! render thread never blocks on the graph lock - housekeeping that needs
//! both is skipped for a quantum when the graph lock is contended - and
//! user callbacks only ever run through [`Context::drain_events`].

pub mod buffer;
pub mod bus;
pub mod codec;
pub mod context;
pub mod device;
pub mod dispatcher;
pub mod dsp;
pub mod error;
pub mod handle;
pub mod junction;
pub mod node;
pub mod nodes;
pub mod offline;
pub mod param;
pub mod ring;
pub mod scheduled;
pub mod timeline;

/// Frames per render quantum. Every internal bus is this long; the device
/// adapter maps host callbacks of any size onto it.
pub const RENDER_QUANTUM_FRAMES: usize = 128;

/// Sample rate used when the host does not dictate one.
pub const DEFAULT_SAMPLE_RATE: f64 = 44_100.0;

/// Most channels a bus will carry.
pub const MAX_CHANNELS: usize = 32;

pub use buffer::AudioChannel;
pub use bus::{AudioBus, ChannelInterpretation};
pub use codec::{decode_wav_file, encode_wav_file, AudioBuffer};
pub use context::{Context, ContextConfig, RenderQuantum};
pub use device::AudioDevice;
pub use error::{Error, Result};
pub use handle::{NodeHandle, ParamHandle};
pub use node::NodeId;
pub use nodes::{
    AudioPlayer, GainNode, MeteringNode, NoiseNode, OscillatorNode, PannerNode, RecorderNode,
    SourceControl, StreamNode, Waveform,
};
pub use offline::OfflineRenderer;
pub use param::Param;
pub use ring::RingBuffer;
pub use scheduled::PlaybackState;
pub use timeline::{ParamEvent, ParamEventKind, ParamTimeline};
