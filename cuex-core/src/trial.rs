use crate::marker::Answer;
use serde::{Deserialize, Serialize};

/// Lifecycle of one test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialState {
    Idle,
    PreInstructions,
    CrosshairBaseline,
    MainInstructions,
    Countdown,
    Presenting,
    WaitingForResponse,
    InterStimulusCrosshair,
    WaitingForNextPress,
    WaitingForTouch,
    PostInstructions,
    Ended,
    /// Holds the state that was active when the pause arrived.
    Paused(Box<TrialState>),
    Stopped,
}

impl TrialState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrialState::Ended | TrialState::Stopped)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, TrialState::Paused(_))
    }

    /// States that end on a deadline rather than on an input event.
    pub fn is_timed(&self) -> bool {
        use TrialState::*;
        matches!(
            self,
            PreInstructions | CrosshairBaseline | Countdown | InterStimulusCrosshair | PostInstructions
        )
    }

    pub fn name(&self) -> &'static str {
        use TrialState::*;
        match self {
            Idle => "Idle",
            PreInstructions => "PreInstructions",
            CrosshairBaseline => "CrosshairBaseline",
            MainInstructions => "MainInstructions",
            Countdown => "Countdown",
            Presenting => "Presenting",
            WaitingForResponse => "WaitingForResponse",
            InterStimulusCrosshair => "InterStimulusCrosshair",
            WaitingForNextPress => "WaitingForNextPress",
            WaitingForTouch => "WaitingForTouch",
            PostInstructions => "PostInstructions",
            Ended => "Ended",
            Paused(_) => "Paused",
            Stopped => "Stopped",
        }
    }
}

/// One row of the Stroop behavioural log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StroopResponse {
    #[serde(rename = "User Inputs")]
    pub answer: Answer,
    /// Seconds since the test started.
    #[serde(rename = "Elapsed Time")]
    pub elapsed_s: f64,
}
