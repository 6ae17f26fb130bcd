use serde::{Deserialize, Serialize};
use std::fmt;

pub const LABELS_OUTLET: &str = "labels";
pub const TACTILE_OUTLET: &str = "tactile_touch";
pub const EYE_OUTLET: &str = "eye_marker";

pub const CROSSHAIR_INSTRUCTIONS: &str = "showing crosshair instructions";
pub const CROSSHAIR_PERIOD: &str = "showing crosshair period";
pub const MAIN_INSTRUCTIONS: &str = "showing main instructions";
pub const COUNTDOWN: &str = "Starting countdown";
pub const TEST_ENDED: &str = "Test Ended";
pub const TACTILE_TOUCH: &str = "tactile_touch";

/// A label stamped with the publishing outlet's clock, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub label: String,
    pub timestamp: f64,
}

/// Stroop answer keyed by the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Answer {
    Yes,
    No,
}

impl Answer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Answer::Yes => "Yes",
            Answer::No => "No",
        }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn onset_label(basename: &str) -> String {
    format!("{basename} Image")
}

pub fn response_label(basename: &str, answer: Answer) -> String {
    format!("{basename} Image: {answer}")
}

/// True for `"<name> Image"`, false for responses and everything else.
pub fn is_onset_label(label: &str) -> bool {
    label.ends_with(" Image")
}

pub fn is_response_label(label: &str) -> bool {
    label.ends_with(" Image: Yes") || label.ends_with(" Image: No")
}
