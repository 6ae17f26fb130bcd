use cuex_core::{Modality, TestCondition};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Durations driving one test run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub test: TestCondition,
    /// How long each image stays on screen.
    pub image_dwell: Duration,
    /// Inter-stimulus crosshair is drawn uniformly from this range, inclusive.
    pub crosshair_range_ms: (u64, u64),
    pub pre_instructions: Duration,
    pub baseline: Duration,
    pub countdown: Duration,
    pub post_instructions: Duration,
}

impl EngineConfig {
    pub fn for_test(test: TestCondition) -> Self {
        let image_dwell = match test.modality() {
            Modality::Passive => Duration::from_millis(5000),
            Modality::Stroop => Duration::from_millis(2000),
        };
        Self {
            test,
            image_dwell,
            crosshair_range_ms: (2000, 5000),
            pre_instructions: Duration::from_millis(5000),
            baseline: Duration::from_millis(60_000),
            countdown: Duration::from_millis(3000),
            post_instructions: Duration::from_millis(5000),
        }
    }

    pub fn crosshair_range(&self) -> RangeInclusive<u64> {
        let (a, b) = self.crosshair_range_ms;
        a.min(b)..=a.max(b)
    }

    pub fn is_stroop(&self) -> bool {
        self.test.modality() == Modality::Stroop
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_test(TestCondition::UnisensoryNeutralVisual)
    }
}
