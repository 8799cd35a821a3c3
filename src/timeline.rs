//! Sample-accurate parameter automation timeline
//!
//! An ordered list of automation events evaluated over half-open time
//! ranges. Each render quantum asks the timeline for one value per frame;
//! between two events the series is shaped by the *next* event's kind,
//! since ramps describe the approach toward their target value.

/// What an automation event does when the value series reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamEventKind {
    SetValue,
    LinearRampToValue,
    ExponentialRampToValue,
}

/// One scheduled automation point.
#[derive(Debug, Clone, Copy)]
pub struct ParamEvent {
    pub kind: ParamEventKind,
    pub value: f32,
    pub time: f64,
}

/// Ordered set of automation events.
#[derive(Debug, Default)]
pub struct ParamTimeline {
    events: Vec<ParamEvent>,
}

impl ParamTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn number_of_events(&self) -> usize {
        self.events.len()
    }

    /// Insert an event, keeping the list sorted by time. An event at the
    /// same time with the same kind replaces the existing one.
    pub fn insert(&mut self, event: ParamEvent) {
        for (i, existing) in self.events.iter().enumerate() {
            if existing.time == event.time && existing.kind == event.kind {
                self.events[i] = event;
                return;
            }
            if existing.time > event.time {
                self.events.insert(i, event);
                return;
            }
        }
        self.events.push(event);
    }

    /// Remove every event scheduled at or after `start_time`.
    pub fn cancel_scheduled_values(&mut self, start_time: f64) {
        self.events.retain(|e| e.time < start_time);
    }

    /// Evaluate the timeline over `[start_time, end_time)` at `sample_rate`,
    /// writing one value per frame into `values`. Returns the last value
    /// produced, which callers treat as the parameter's scalar summary.
    ///
    /// `default_value` is used for any frames before the first event, and
    /// for the whole range when the timeline is empty.
    pub fn values_for_time_range(
        &self,
        start_time: f64,
        end_time: f64,
        default_value: f32,
        values: &mut [f32],
        sample_rate: f64,
    ) -> f32 {
        let frames = values.len();
        if frames == 0 {
            return default_value;
        }

        if self.events.is_empty() || end_time <= self.events[0].time {
            values.fill(default_value);
            return default_value;
        }

        let frame_index = |time: f64| -> usize {
            (((time - start_time) * sample_rate).ceil().max(0.0) as usize).min(frames)
        };

        let mut value = default_value;
        let mut write = 0;

        // Frames before the first event hold the default.
        let lead = frame_index(self.events[0].time);
        if lead > write {
            values[write..lead].fill(default_value);
            write = lead;
        }

        for i in 0..self.events.len() {
            let event = self.events[i];
            let next = self.events.get(i + 1);

            let value1 = event.value;
            let time1 = event.time;
            let (fill_to_time, value2, time2) = match next {
                Some(n) => (end_time.min(n.time), n.value, n.time),
                None => (end_time, event.value, end_time),
            };
            let fill_to = frame_index(fill_to_time).max(write);

            match next.map(|n| n.kind) {
                Some(ParamEventKind::LinearRampToValue) => {
                    let delta = time2 - time1;
                    let k = if delta > 0.0 { 1.0 / delta } else { 0.0 };
                    for j in write..fill_to {
                        let t = start_time + j as f64 / sample_rate;
                        let x = ((t - time1) * k).clamp(0.0, 1.0) as f32;
                        value = (1.0 - x) * value1 + x * value2;
                        values[j] = value;
                    }
                }
                Some(ParamEventKind::ExponentialRampToValue) => {
                    if value1 <= 0.0 || value2 <= 0.0 {
                        // An exponential ramp through zero is undefined;
                        // hold the current value instead.
                        value = value1;
                        values[write..fill_to].fill(value);
                    } else {
                        let delta = time2 - time1;
                        let total_frames = (delta * sample_rate).max(1.0);
                        let ratio = (value2 / value1) as f64;
                        let multiplier = ratio.powf(1.0 / total_frames);
                        if fill_to > write {
                            let t = start_time + write as f64 / sample_rate;
                            let n = ((t - time1) * sample_rate).max(0.0);
                            let mut v = value1 as f64 * ratio.powf(n / total_frames);
                            for j in write..fill_to {
                                value = v as f32;
                                values[j] = value;
                                v *= multiplier;
                            }
                        } else {
                            value = value1;
                        }
                    }
                }
                Some(ParamEventKind::SetValue) | None => {
                    // Step to this event's value and hold.
                    value = value1;
                    values[write..fill_to].fill(value);
                }
            }

            write = fill_to.max(write);
            if write >= frames {
                break;
            }
        }

        // Frames past the last event hold the last produced value.
        if write < frames {
            values[write..frames].fill(value);
        }

        value
    }
}
