use cuex_core::Answer;
use std::time::Duration;

/// Timing of one presented image.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementTiming {
    pub index: usize,
    pub basename: String,
    pub onset_ns: u64,
    pub response: Option<Answer>,
    pub latency: Option<Duration>,
}

impl ElementTiming {
    pub fn new(index: usize, basename: impl Into<String>, onset_ns: u64) -> Self {
        Self {
            index,
            basename: basename.into(),
            onset_ns,
            response: None,
            latency: None,
        }
    }

    pub fn record_response(&mut self, answer: Answer, at_ns: u64) -> Duration {
        let latency = Duration::from_nanos(at_ns.saturating_sub(self.onset_ns));
        self.response = Some(answer);
        self.latency = Some(latency);
        latency
    }
}
