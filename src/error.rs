//! Crate-wide error type
//!
//! Graph-edit and codec failures surface here synchronously. The render
//! path never returns errors: any internal failure yields silence for the
//! affected block instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("source output index {index} out of range ({count} outputs)")]
    SourceIndexOutOfRange { index: usize, count: usize },

    #[error("destination input index {index} out of range ({count} inputs)")]
    DestinationIndexOutOfRange { index: usize, count: usize },

    #[error("connection would create a cycle in the audio graph")]
    CycleDetected,

    #[error("channel count {0} exceeds the supported maximum of {max}", max = crate::MAX_CHANNELS)]
    TooManyChannels(usize),

    #[error("node is no longer registered with its context")]
    UnknownNode,

    #[error("unknown parameter '{0}'")]
    UnknownParam(String),

    #[error("parameter value {0} is not finite")]
    NonFiniteParamValue(f32),

    #[error("exponential ramp target must be non-zero")]
    ZeroRampTarget,

    #[error("wav codec error: {0}")]
    Codec(#[from] hound::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audio device error: {0}")]
    Device(String),
}
