use super::{ForceSample, MarkerGate};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchConfig {
    /// Offset above baseline that counts as a touch.
    pub threshold: i64,
    /// Peak-to-peak below which the signal is considered at rest.
    pub rezero_threshold: i64,
    pub rezero_window: Duration,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            threshold: 500,
            rezero_threshold: 50,
            rezero_window: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchEvent {
    pub timestamp: f64,
    pub raw: i64,
    pub baseline: i64,
}

/// Baseline tracking and rising-edge detection over a sample stream.
///
/// The first sample seeds the baseline. While the sensor is not touched and
/// the last `rezero_window` of samples spans less than `rezero_threshold`,
/// the baseline follows the signal, at most once per window.
#[derive(Debug)]
pub struct TouchDetector {
    config: TouchConfig,
    gate: MarkerGate,
    window: VecDeque<ForceSample>,
    baseline: Option<i64>,
    last_rezero: f64,
    touched: bool,
}

impl TouchDetector {
    pub fn new(config: TouchConfig, gate: MarkerGate) -> Self {
        Self {
            config,
            gate,
            window: VecDeque::new(),
            baseline: None,
            last_rezero: 0.0,
            touched: false,
        }
    }

    pub fn baseline(&self) -> Option<i64> {
        self.baseline
    }

    pub fn is_touched(&self) -> bool {
        self.touched
    }

    pub fn gate(&self) -> &MarkerGate {
        &self.gate
    }

    /// Forgets baseline, window and edge state. A reconnected sensor starts
    /// a new clock, so the old ones no longer apply.
    pub fn reset(&mut self) {
        self.window.clear();
        self.baseline = None;
        self.last_rezero = 0.0;
        self.touched = false;
    }

    /// Feeds one sample. Returns a touch only on a rising edge while the
    /// gate is open; edges are tracked whether or not the gate is open.
    pub fn process(&mut self, sample: ForceSample) -> Option<TouchEvent> {
        let window_s = self.config.rezero_window.as_secs_f64();
        self.window.push_back(sample);
        while self
            .window
            .front()
            .is_some_and(|s| s.timestamp <= sample.timestamp - window_s)
        {
            self.window.pop_front();
        }

        let mut baseline = match self.baseline {
            Some(b) => b,
            None => {
                self.baseline = Some(sample.raw);
                self.last_rezero = sample.timestamp;
                tracing::debug!(baseline = sample.raw, "force baseline seeded");
                sample.raw
            }
        };

        let touched = sample.raw.saturating_sub(baseline) > self.config.threshold;
        if !touched && !self.touched && sample.timestamp - self.last_rezero >= window_s {
            let (min, max) = self
                .window
                .iter()
                .fold((i64::MAX, i64::MIN), |(lo, hi), s| (lo.min(s.raw), hi.max(s.raw)));
            if max.saturating_sub(min) < self.config.rezero_threshold {
                baseline = sample.raw;
                self.baseline = Some(baseline);
                self.last_rezero = sample.timestamp;
                tracing::debug!(baseline, "force baseline re-zeroed");
            }
        }

        let rising = touched && !self.touched;
        self.touched = touched;
        if rising && self.gate.is_enabled() {
            Some(TouchEvent {
                timestamp: sample.timestamp,
                raw: sample.raw,
                baseline,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn open_detector() -> TouchDetector {
        let gate = MarkerGate::new();
        gate.enable();
        TouchDetector::new(TouchConfig::default(), gate)
    }

    fn s(timestamp: f64, raw: i64) -> ForceSample {
        ForceSample { timestamp, raw }
    }

    #[test]
    fn auto_zero_then_single_touch() {
        let mut det = open_detector();
        let mut touches = Vec::new();
        let mut t = 0.0;
        // 1000 for 0.5 s at 100 Hz
        while t < 0.5 {
            touches.extend(det.process(s(t, 1000)));
            t += 0.01;
        }
        // 1005 +/- 10 for 3 s
        let jitter = [-10, -4, 0, 3, 10, 7, -2, -9];
        let mut i = 0;
        while t < 3.5 {
            touches.extend(det.process(s(t, 1005 + jitter[i % jitter.len()])));
            t += 0.01;
            i += 1;
        }
        let baseline = det.baseline().unwrap();
        assert!((995..=1015).contains(&baseline), "baseline {baseline}");
        assert!(touches.is_empty());

        // 1600 for 10 ms
        touches.extend(det.process(s(t, 1600)));
        touches.extend(det.process(s(t + 0.005, 1600)));
        touches.extend(det.process(s(t + 0.010, 1600)));
        assert_eq!(touches.len(), 1);
        assert_eq!(touches[0].raw, 1600);
        assert_eq!(touches[0].baseline, baseline);
    }

    #[test]
    fn held_touch_is_not_re_zeroed() {
        let mut det = open_detector();
        det.process(s(0.0, 0));
        assert!(det.process(s(0.1, 800)).is_some());
        for k in 1..600 {
            assert!(det.process(s(0.1 + k as f64 * 0.01, 800)).is_none());
        }
        assert_eq!(det.baseline(), Some(0));
        assert!(det.is_touched());
    }

    #[test]
    fn closed_gate_swallows_the_edge() {
        let gate = MarkerGate::new();
        let mut det = TouchDetector::new(TouchConfig::default(), gate.clone());
        det.process(s(0.0, 0));
        assert!(det.process(s(0.1, 900)).is_none());
        gate.enable();
        // Still pressed: no new edge.
        assert!(det.process(s(0.2, 900)).is_none());
        det.process(s(0.3, 0));
        assert!(det.process(s(0.4, 900)).is_some());
    }

    #[test]
    fn extreme_readings_do_not_overflow() {
        let mut det = open_detector();
        det.process(s(0.0, 1000));
        assert!(det.process(s(0.1, i64::MIN)).is_none());
        assert!(det.process(s(0.2, i64::MAX)).is_some());
        for k in 0..300 {
            det.process(s(0.3 + k as f64 * 0.01, if k % 2 == 0 { i64::MIN } else { i64::MAX }));
        }
        assert_eq!(det.baseline(), Some(1000));
    }

    #[test]
    fn reset_reseeds_from_the_next_sample() {
        let mut det = open_detector();
        det.process(s(100.0, 5000));
        det.process(s(100.1, 6000));
        assert!(det.is_touched());

        det.reset();
        assert_eq!(det.baseline(), None);
        assert!(!det.is_touched());
        det.process(s(0.0, 1000));
        assert_eq!(det.baseline(), Some(1000));
        assert!(det.process(s(0.1, 1600)).is_some());
    }

    proptest! {
        #[test]
        fn touches_are_separated_by_a_release(raws in prop::collection::vec(0i64..2000, 1..400)) {
            let mut det = open_detector();
            let mut released_since_last = true;
            for (k, raw) in raws.into_iter().enumerate() {
                let event = det.process(s(k as f64 * 0.01, raw));
                if event.is_some() {
                    prop_assert!(released_since_last);
                    released_since_last = false;
                }
                if !det.is_touched() {
                    released_since_last = true;
                }
            }
        }
    }
}
