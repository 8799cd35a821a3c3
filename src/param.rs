//! Named automation parameters
//!
//! A [`Param`] is a scalar control on a node — gain, pan, frequency — that
//! can be set directly, automated through its timeline, or modulated at
//! audio rate by connecting another node's output to it. Each quantum the
//! engine materializes the parameter into either a plain scalar or a
//! per-frame value series, and processors read whichever is active.

use crate::dsp;
use crate::junction::RenderJunction;
use crate::timeline::ParamTimeline;
use crate::RENDER_QUANTUM_FRAMES;

pub struct Param {
    name: &'static str,
    default_value: f32,
    min_value: f32,
    max_value: f32,
    value: f32,
    timeline: ParamTimeline,
    junction: RenderJunction,
    values: [f32; RENDER_QUANTUM_FRAMES],
    sample_accurate: bool,
}

impl Param {
    pub fn new(name: &'static str, default_value: f32, min_value: f32, max_value: f32) -> Self {
        debug_assert!(min_value <= max_value);
        Self {
            name,
            default_value,
            min_value,
            max_value,
            value: default_value,
            timeline: ParamTimeline::new(),
            junction: RenderJunction::new(),
            values: [0.0; RENDER_QUANTUM_FRAMES],
            sample_accurate: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_value(&self) -> f32 {
        self.default_value
    }

    /// Advisory lower bound. Values outside `[min, max]` are not clamped.
    pub fn min_value(&self) -> f32 {
        self.min_value
    }

    /// Advisory upper bound. Values outside `[min, max]` are not clamped.
    pub fn max_value(&self) -> f32 {
        self.max_value
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn set_value(&mut self, value: f32) {
        self.value = value;
    }

    pub fn timeline(&self) -> &ParamTimeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut ParamTimeline {
        &mut self.timeline
    }

    pub fn junction(&self) -> &RenderJunction {
        &self.junction
    }

    pub fn junction_mut(&mut self) -> &mut RenderJunction {
        &mut self.junction
    }

    /// True when the parameter needs a per-frame value series this quantum:
    /// the timeline has events or a modulation input is connected.
    pub fn has_sample_accurate_values(&self) -> bool {
        self.timeline.has_events() || !self.junction.is_empty()
    }

    /// Whether the per-frame series is active for the current quantum.
    pub fn is_sample_accurate(&self) -> bool {
        self.sample_accurate
    }

    /// The materialized per-frame values for the current quantum.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Read the parameter at frame `i` of the current quantum.
    #[inline]
    pub fn sample(&self, i: usize) -> f32 {
        if self.sample_accurate {
            self.values[i]
        } else {
            self.value
        }
    }

    // Engine-side materialization hooks, called once per quantum before the
    // owning node processes.

    pub(crate) fn begin_quantum_plain(&mut self) {
        self.sample_accurate = false;
    }

    pub(crate) fn fill_from_timeline(
        &mut self,
        start_time: f64,
        end_time: f64,
        sample_rate: f64,
        frames: usize,
    ) {
        self.value = self.timeline.values_for_time_range(
            start_time,
            end_time,
            self.value,
            &mut self.values[..frames],
            sample_rate,
        );
    }

    pub(crate) fn sum_modulation(&mut self, samples: &[f32], frames: usize) {
        dsp::vacc(&samples[..frames], &mut self.values[..frames]);
    }

    pub(crate) fn mark_sample_accurate(&mut self) {
        self.sample_accurate = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{ParamEvent, ParamEventKind};

    #[test]
    fn test_plain_param_reads_scalar() {
        let mut param = Param::new("gain", 1.0, 0.0, 10.0);
        assert_eq!(param.sample(0), 1.0);
        param.set_value(0.25);
        assert_eq!(param.sample(64), 0.25);
        assert!(!param.has_sample_accurate_values());
    }

    #[test]
    fn test_timeline_event_makes_param_sample_accurate() {
        let mut param = Param::new("gain", 1.0, 0.0, 10.0);
        param.timeline_mut().insert(ParamEvent {
            kind: ParamEventKind::SetValue,
            value: 0.5,
            time: 0.0,
        });
        assert!(param.has_sample_accurate_values());

        param.fill_from_timeline(0.0, 128.0 / 44_100.0, 44_100.0, 128);
        param.mark_sample_accurate();

        assert!(param.is_sample_accurate());
        assert_eq!(param.sample(0), 0.5);
        assert_eq!(param.value(), 0.5);
    }

    #[test]
    fn test_modulation_sums_into_series() {
        let mut param = Param::new("gain", 0.5, 0.0, 10.0);
        param.fill_from_timeline(0.0, 128.0 / 44_100.0, 44_100.0, 128);

        let modulation = [0.25f32; 128];
        param.sum_modulation(&modulation, 128);
        param.mark_sample_accurate();

        assert_eq!(param.sample(0), 0.75);
    }

    #[test]
    fn test_bounds_are_advisory() {
        let mut param = Param::new("gain", 1.0, 0.0, 1.0);
        param.set_value(4.0);
        assert_eq!(param.value(), 4.0);
    }
}
