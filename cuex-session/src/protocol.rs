//! Control-channel messages: one JSON object per line, tagged by `action`.

use cuex_core::{Classify, ErrorKind, TestCondition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of a `host_status` that reports a device fault.
pub const FAULT_PREFIX: &str = "fault: ";

const ACTIONS: [&str; 14] = [
    "start_button",
    "stop_button",
    "pause_button",
    "resume_button",
    "label",
    "touchbox_lsl_true",
    "object_touched",
    "labrecorder_connected",
    "eyetracker_connected",
    "tactile_connected",
    "latency_ping",
    "latency_pong",
    "host_status",
    "client_log",
];

fn connected_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    StartButton {
        test: String,
        /// Resolved basenames, so the host can drive the turntable.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence: Option<Vec<String>>,
    },
    StopButton {
        test: String,
    },
    /// The running test paused; the host holds its devices.
    PauseButton {
        test: String,
    },
    ResumeButton {
        test: String,
    },
    Label {
        label: String,
    },
    TouchboxLslTrue,
    ObjectTouched,
    LabrecorderConnected {
        #[serde(default = "connected_default")]
        connected: bool,
    },
    EyetrackerConnected {
        #[serde(default = "connected_default")]
        connected: bool,
    },
    TactileConnected {
        #[serde(default = "connected_default")]
        connected: bool,
    },
    LatencyPing {
        timestamp: f64,
    },
    LatencyPong {
        timestamp: f64,
    },
    HostStatus {
        status: String,
    },
    ClientLog {
        message: String,
    },
}

impl ControlMessage {
    pub fn start(test: TestCondition, sequence: Option<Vec<String>>) -> Self {
        ControlMessage::StartButton {
            test: test.name().to_string(),
            sequence,
        }
    }

    pub fn stop(test: TestCondition) -> Self {
        ControlMessage::StopButton {
            test: test.name().to_string(),
        }
    }

    pub fn pause(test: TestCondition) -> Self {
        ControlMessage::PauseButton {
            test: test.name().to_string(),
        }
    }

    pub fn resume(test: TestCondition) -> Self {
        ControlMessage::ResumeButton {
            test: test.name().to_string(),
        }
    }

    pub fn status(status: impl Into<String>) -> Self {
        ControlMessage::HostStatus { status: status.into() }
    }

    pub fn fault(message: impl std::fmt::Display) -> Self {
        ControlMessage::HostStatus {
            status: format!("{FAULT_PREFIX}{message}"),
        }
    }

    /// The fault text of a fault `host_status`.
    pub fn fault_message(&self) -> Option<&str> {
        match self {
            ControlMessage::HostStatus { status } => status.strip_prefix(FAULT_PREFIX),
            _ => None,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            ControlMessage::StartButton { .. } => "start_button",
            ControlMessage::StopButton { .. } => "stop_button",
            ControlMessage::PauseButton { .. } => "pause_button",
            ControlMessage::ResumeButton { .. } => "resume_button",
            ControlMessage::Label { .. } => "label",
            ControlMessage::TouchboxLslTrue => "touchbox_lsl_true",
            ControlMessage::ObjectTouched => "object_touched",
            ControlMessage::LabrecorderConnected { .. } => "labrecorder_connected",
            ControlMessage::EyetrackerConnected { .. } => "eyetracker_connected",
            ControlMessage::TactileConnected { .. } => "tactile_connected",
            ControlMessage::LatencyPing { .. } => "latency_ping",
            ControlMessage::LatencyPong { .. } => "latency_pong",
            ControlMessage::HostStatus { .. } => "host_status",
            ControlMessage::ClientLog { .. } => "client_log",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed control message: {0}")]
    Malformed(String),

    #[error("unknown action {0:?}")]
    UnknownAction(String),
}

impl Classify for ProtocolError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::ProtocolError
    }
}

pub fn decode(line: &str) -> Result<ControlMessage, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let action = value
        .get("action")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing action".into()))?;
    if !ACTIONS.contains(&action) {
        return Err(ProtocolError::UnknownAction(action.to_string()));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Serializes `msg` without the trailing newline.
pub fn encode(msg: &ControlMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Device readiness the host broadcasts and the client gates Start on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub recorder: bool,
    pub eyetracker: bool,
    pub tactile: bool,
}

impl Readiness {
    pub fn messages(&self) -> [ControlMessage; 3] {
        [
            ControlMessage::LabrecorderConnected {
                connected: self.recorder,
            },
            ControlMessage::EyetrackerConnected {
                connected: self.eyetracker,
            },
            ControlMessage::TactileConnected {
                connected: self.tactile,
            },
        ]
    }

    /// Folds a status broadcast in. Returns false for any other message.
    pub fn apply(&mut self, msg: &ControlMessage) -> bool {
        match *msg {
            ControlMessage::LabrecorderConnected { connected } => self.recorder = connected,
            ControlMessage::EyetrackerConnected { connected } => self.eyetracker = connected,
            ControlMessage::TactileConnected { connected } => self.tactile = connected,
            _ => return false,
        }
        true
    }

    /// Devices `test` needs that are not ready.
    pub fn missing(&self, test: TestCondition) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.recorder {
            missing.push("recorder");
        }
        if !self.eyetracker {
            missing.push("eye-tracker");
        }
        if test.uses_tactile() && !self.tactile {
            missing.push("force sensor");
        }
        missing
    }
}
