/// One control point of a [`Curve`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Keyframe {
    pub time: f32,
    pub value: f32,
}

/// Piecewise-linear response curve, `curve(t) -> f32`.
///
/// Keys are kept sorted by time. Evaluation before the first key or after
/// the last key holds the end value. A curve with no keys is "absent" and
/// never modulates a parameter.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Curve {
    keys: Vec<Keyframe>,
}

impl Curve {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(time, value)` pairs in any order. Non-finite pairs are dropped.
    pub fn from_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = (f32, f32)>,
    {
        let mut keys: Vec<Keyframe> = keys
            .into_iter()
            .filter(|(t, v)| t.is_finite() && v.is_finite())
            .map(|(time, value)| Keyframe { time, value })
            .collect();
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keys }
    }

    pub fn constant(value: f32) -> Self {
        Self::from_keys([(0.0, value)])
    }

    /// Straight ramp from `start` at t=0 to `end` at t=1.
    pub fn linear(start: f32, end: f32) -> Self {
        Self::from_keys([(0.0, start), (1.0, end)])
    }

    pub fn add_key(&mut self, time: f32, value: f32) {
        if !time.is_finite() || !value.is_finite() {
            return;
        }
        let at = self.keys.partition_point(|k| k.time <= time);
        self.keys.insert(at, Keyframe { time, value });
    }

    pub fn keys(&self) -> &[Keyframe] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn evaluate(&self, t: f32) -> f32 {
        let (first, last) = match (self.keys.first(), self.keys.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 1.0,
        };
        if t <= first.time {
            return first.value;
        }
        if t >= last.time {
            return last.value;
        }

        let hi = self.keys.partition_point(|k| k.time <= t);
        let a = self.keys[hi - 1];
        let b = self.keys[hi];
        let span = b.time - a.time;
        if span <= f32::EPSILON {
            return b.value;
        }
        a.value + (b.value - a.value) * ((t - a.time) / span)
    }
}
