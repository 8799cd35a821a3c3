//! Client-side handles for nodes and parameters
//!
//! Node types hand out a [`NodeHandle`] (by deref) through which client
//! code edits the graph. Handles are cheap to clone and safe to use from
//! any thread; every edit goes through the context's deferred connection
//! queue, so the render thread never observes a half-applied change.

use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::node::NodeId;
use crate::timeline::{ParamEvent, ParamEventKind};
use crate::Error;

/// A reference to one registered node.
#[derive(Clone)]
pub struct NodeHandle {
    context: Arc<Context>,
    id: NodeId,
}

impl NodeHandle {
    pub(crate) fn new(context: Arc<Context>, id: NodeId) -> Self {
        Self { context, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn number_of_inputs(&self) -> usize {
        self.context.node_io_counts(self.id).map(|c| c.0).unwrap_or(0)
    }

    pub fn number_of_outputs(&self) -> usize {
        self.context.node_io_counts(self.id).map(|c| c.1).unwrap_or(0)
    }

    /// Connect this node's first output to the context destination.
    pub fn connect_to_destination(&self) -> Result<()> {
        self.context
            .connect_nodes(self.id, 0, self.context.destination_id(), 0)
    }

    /// Connect this node's first output to `dest`'s first input.
    pub fn connect(&self, dest: &NodeHandle) -> Result<()> {
        self.context.connect_nodes(self.id, 0, dest.id, 0)
    }

    /// Connect a specific output to a specific input of `dest`.
    pub fn connect_indexed(
        &self,
        dest: &NodeHandle,
        dest_index: usize,
        src_index: usize,
    ) -> Result<()> {
        self.context
            .connect_nodes(self.id, src_index, dest.id, dest_index)
    }

    /// Begin a faded disconnect of the edge to `dest`, if present.
    pub fn disconnect(&self, dest: &NodeHandle) -> Result<()> {
        self.context.disconnect_nodes(self.id, 0, dest.id, 0)
    }

    /// Begin a faded disconnect of the edge to the context destination.
    pub fn disconnect_from_destination(&self) -> Result<()> {
        self.context
            .disconnect_nodes(self.id, 0, self.context.destination_id(), 0)
    }

    /// Begin a faded disconnect of every edge leaving this node.
    pub fn disconnect_all(&self) -> Result<()> {
        self.context.disconnect_all_from(self.id)
    }

    /// Look up a parameter by name.
    pub fn param(&self, name: &str) -> Result<ParamHandle> {
        let index = self.context.param_index(self.id, name)?;
        Ok(ParamHandle {
            context: Arc::clone(&self.context),
            node: self.id,
            index,
        })
    }
}

/// A reference to one automation parameter of a node.
#[derive(Clone)]
pub struct ParamHandle {
    context: Arc<Context>,
    node: NodeId,
    index: usize,
}

impl ParamHandle {
    pub fn value(&self) -> Result<f32> {
        self.context.with_param(self.node, self.index, |p| p.value())
    }

    pub fn default_value(&self) -> Result<f32> {
        self.context
            .with_param(self.node, self.index, |p| p.default_value())
    }

    pub fn min_value(&self) -> Result<f32> {
        self.context
            .with_param(self.node, self.index, |p| p.min_value())
    }

    pub fn max_value(&self) -> Result<f32> {
        self.context
            .with_param(self.node, self.index, |p| p.max_value())
    }

    /// Set the parameter's scalar value immediately.
    pub fn set_value(&self, value: f32) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::NonFiniteParamValue(value));
        }
        self.context
            .with_param(self.node, self.index, |p| p.set_value(value))
    }

    /// Schedule a step to `value` at absolute context time `time`.
    pub fn set_value_at_time(&self, value: f32, time: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::NonFiniteParamValue(value));
        }
        self.context.with_param(self.node, self.index, |p| {
            p.timeline_mut().insert(ParamEvent {
                kind: ParamEventKind::SetValue,
                value,
                time,
            })
        })
    }

    /// Schedule a linear ramp reaching `value` at `time`.
    pub fn linear_ramp_to_value_at_time(&self, value: f32, time: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::NonFiniteParamValue(value));
        }
        self.context.with_param(self.node, self.index, |p| {
            p.timeline_mut().insert(ParamEvent {
                kind: ParamEventKind::LinearRampToValue,
                value,
                time,
            })
        })
    }

    /// Schedule an exponential ramp reaching `value` at `time`. The target
    /// must be non-zero; an exponential approach to zero never arrives.
    pub fn exponential_ramp_to_value_at_time(&self, value: f32, time: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::NonFiniteParamValue(value));
        }
        if value == 0.0 {
            return Err(Error::ZeroRampTarget);
        }
        self.context.with_param(self.node, self.index, |p| {
            p.timeline_mut().insert(ParamEvent {
                kind: ParamEventKind::ExponentialRampToValue,
                value,
                time,
            })
        })
    }

    /// Remove every scheduled event at or after `start_time`.
    pub fn cancel_scheduled_values(&self, start_time: f64) -> Result<()> {
        self.context.with_param(self.node, self.index, |p| {
            p.timeline_mut().cancel_scheduled_values(start_time)
        })
    }

    /// Route `driver`'s first output into this parameter as audio-rate
    /// modulation, summed on top of the timeline value.
    pub fn modulate_with(&self, driver: &NodeHandle) -> Result<()> {
        self.context
            .connect_param(self.node, self.index, driver.id(), 0)
    }
}
