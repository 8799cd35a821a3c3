//! The context-owned destination node
//!
//! The destination is the sink the device adapter pulls from: one input,
//! no outputs. Pulling its input under the render lock evaluates the
//! entire graph for the quantum; the context then copies the resolved
//! input bus out to the caller. The processor itself has nothing to do.

use crate::node::{ProcessArgs, Processor, RenderContext};

pub struct DestinationProcessor;

impl Processor for DestinationProcessor {
    fn process(&mut self, _args: ProcessArgs<'_>, _ctx: &RenderContext<'_>) {
        // Sink: the context reads the resolved input bus directly.
    }

    fn name(&self) -> &'static str {
        "Destination"
    }
}
