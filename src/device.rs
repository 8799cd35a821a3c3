//! Device adapter - bridges the host audio callback to the graph
//!
//! cpal delivers callbacks with whatever frame count the host picked; the
//! graph only renders fixed 128-frame quanta. The adapter renders quanta
//! on demand inside the output callback, carries leftover frames across
//! callbacks, and interleaves into the host buffer. Capture flows the
//! other way through a ring buffer: the input callback pushes a mono
//! mixdown, the output callback pops one quantum's worth ahead of each
//! render.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info, warn};

use crate::bus::AudioBus;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::ring::RingBuffer;
use crate::RENDER_QUANTUM_FRAMES;

/// Default requested host buffer size, in frames (about 3 ms at 44.1 kHz).
const DEFAULT_BUFFER_SIZE: usize = 128;

/// Quanta of capture queued before rendering starts consuming it.
const CAPTURE_WARMUP_QUANTA: usize = 4;

/// Host buffer size override from `POLARON_BUFFER_SIZE`, clamped to sane
/// bounds (0.7 ms - 46 ms at 44.1 kHz).
fn buffer_size_from_env() -> usize {
    std::env::var("POLARON_BUFFER_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_BUFFER_SIZE)
        .clamp(32, 2048)
}

/// Renders quanta on demand and interleaves them into host buffers.
struct RenderPump {
    context: Arc<Context>,
    quantum: AudioBus,
    /// Frames of the current quantum not yet copied out.
    remaining: usize,
    position: usize,
    capture_ring: Option<Arc<Mutex<RingBuffer>>>,
    capture_scratch: Vec<f32>,
    warmed: bool,
}

impl RenderPump {
    fn fill<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let channels = channels.max(1);
        let frames = data.len() / channels;
        if frames == 0 {
            return;
        }

        // Hold output until enough capture is queued, so the first popped
        // quantum is never a partial read.
        if let Some(ring) = &self.capture_ring {
            if !self.warmed {
                let available = ring
                    .lock()
                    .map(|r| r.available_for_reading())
                    .unwrap_or(0);
                if available < CAPTURE_WARMUP_QUANTA * RENDER_QUANTUM_FRAMES {
                    for sample in data.iter_mut() {
                        *sample = T::from_sample(0.0);
                    }
                    return;
                }
                self.warmed = true;
            }
        }

        let mut frame = 0;
        while frame < frames {
            if self.remaining == 0 {
                let capture = match &self.capture_ring {
                    Some(ring) => {
                        self.capture_scratch.fill(0.0);
                        if let Ok(mut ring) = ring.lock() {
                            // Underrun pads with the zeros already staged.
                            ring.pop(&mut self.capture_scratch);
                        }
                        Some(self.capture_scratch.as_slice())
                    }
                    None => None,
                };
                self.context.render_quantum(&mut self.quantum, capture);
                self.remaining = RENDER_QUANTUM_FRAMES;
                self.position = 0;
            }

            let n = (frames - frame).min(self.remaining);
            let left = self.quantum.channel(0).data();
            let right_index = if self.quantum.number_of_channels() > 1 { 1 } else { 0 };
            let right = self.quantum.channel(right_index).data();

            for i in 0..n {
                let base = (frame + i) * channels;
                data[base] = T::from_sample(left[self.position + i]);
                if channels > 1 {
                    data[base + 1] = T::from_sample(right[self.position + i]);
                    for extra in 2..channels {
                        data[base + extra] = T::from_sample(0.0);
                    }
                }
            }

            self.position += n;
            self.remaining -= n;
            frame += n;
        }
    }
}

/// A running pair of cpal streams driving a context.
///
/// Dropping the device stops both streams; the context survives and can
/// be restarted with a new device.
pub struct AudioDevice {
    context: Arc<Context>,
    _output_stream: cpal::Stream,
    _input_stream: Option<cpal::Stream>,
    sample_rate: u32,
    output_channels: usize,
}

impl AudioDevice {
    /// Open the default output (and, when the context wants input, the
    /// default input) device and start rendering.
    pub fn start(context: Arc<Context>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no default output device".into()))?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());

        let default_config = device
            .default_output_config()
            .map_err(|e| Error::Device(e.to_string()))?;
        let sample_rate = default_config.sample_rate().0;
        let output_channels = default_config.channels() as usize;
        let sample_format = default_config.sample_format();

        let buffer_size = buffer_size_from_env();
        let mut config: cpal::StreamConfig = default_config.into();
        config.buffer_size = cpal::BufferSize::Fixed(buffer_size as u32);

        info!(
            device = %device_name,
            sample_rate,
            channels = output_channels,
            buffer_size,
            "starting audio device"
        );

        // Capture ring sized for two seconds of audio; overruns drop the
        // oldest samples silently.
        let capture_ring = if context.config().input_channels > 0 {
            Some(Arc::new(Mutex::new(RingBuffer::with_capacity(
                2 * context.sample_rate() as usize,
            ))))
        } else {
            None
        };

        let input_stream = match &capture_ring {
            Some(ring) => build_input_stream(&host, Arc::clone(ring)),
            None => None,
        };

        context.initialize();

        let mut pump = RenderPump {
            context: Arc::clone(&context),
            quantum: AudioBus::new(
                context.config().output_channels,
                RENDER_QUANTUM_FRAMES,
                context.sample_rate(),
            ),
            remaining: 0,
            position: 0,
            capture_ring: capture_ring.filter(|_| input_stream.is_some()),
            capture_scratch: vec![0.0; RENDER_QUANTUM_FRAMES],
            warmed: false,
        };

        let err_fn = |err| error!("audio output stream error: {err}");
        let output_stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    pump.fill(data, output_channels);
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    pump.fill(data, output_channels);
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::U16 => device.build_output_stream(
                &config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    pump.fill(data, output_channels);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(Error::Device(format!(
                    "unsupported output sample format {other:?}"
                )))
            }
        }
        .map_err(|e| Error::Device(e.to_string()))?;

        output_stream
            .play()
            .map_err(|e| Error::Device(e.to_string()))?;

        Ok(Self {
            context,
            _output_stream: output_stream,
            _input_stream: input_stream,
            sample_rate,
            output_channels,
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }
}

/// Open the default input device and feed a mono mixdown into the ring.
/// Capture is best-effort: any failure logs and leaves the graph without
/// live input rather than failing device startup.
fn build_input_stream(
    host: &cpal::Host,
    ring: Arc<Mutex<RingBuffer>>,
) -> Option<cpal::Stream> {
    let device = match host.default_input_device() {
        Some(device) => device,
        None => {
            warn!("no default input device; capture disabled");
            return None;
        }
    };
    let config = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            warn!("failed to query input config: {e}; capture disabled");
            return None;
        }
    };
    if config.sample_format() != cpal::SampleFormat::F32 {
        warn!(
            "input format {:?} unsupported; capture disabled",
            config.sample_format()
        );
        return None;
    }

    let channels = config.channels().max(1) as usize;
    let err_fn = |err| error!("audio input stream error: {err}");
    let stream = device
        .build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let Ok(mut ring) = ring.lock() else {
                    return;
                };
                let scale = 1.0 / channels as f32;
                let mut dropped = 0;
                for frame in data.chunks_exact(channels) {
                    let mono: f32 = frame.iter().sum::<f32>() * scale;
                    dropped += ring.push(&[mono]);
                }
                if dropped > 0 {
                    debug!(dropped, "capture ring overrun");
                }
            },
            err_fn,
            None,
        )
        .ok()?;

    match stream.play() {
        Ok(()) => {
            debug!(channels, "capture stream started");
            Some(stream)
        }
        Err(e) => {
            warn!("failed to start capture stream: {e}");
            None
        }
    }
}
