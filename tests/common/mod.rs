//! Shared helpers for the integration tests
#![allow(dead_code)]

use std::sync::Arc;

use polaron::{Context, ContextConfig, OfflineRenderer, SourceControl, StreamNode};

/// An offline context plus the renderer driving it.
pub fn offline_context() -> (Arc<Context>, OfflineRenderer) {
    let context = Context::new_offline(ContextConfig::default());
    let renderer = OfflineRenderer::new(Arc::clone(&context));
    (context, renderer)
}

/// A mono stream source emitting a constant value, already playing.
pub fn constant_source(context: &Arc<Context>, value: f32) -> StreamNode {
    let node = StreamNode::new(context, 1).unwrap();
    node.set_callback(Box::new(move |bus, offset, frames| {
        bus.channel_mut(0).data_mut()[offset..offset + frames].fill(value);
    }));
    node.play(0.0).unwrap();
    node
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |p, s| p.max(s.abs()))
}
