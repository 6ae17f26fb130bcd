//! Drivers for the peripheral devices of a session: the marker bus, the
//! session recorder, the eye-tracker, the force sensor and the turntable.
//!
//! Every driver converts its own failures into [`cuex_core::ErrorKind`]
//! through [`cuex_core::Classify`] before they reach the trial engine.

pub mod bus;
pub mod eyetracker;
pub mod force;
pub mod recorder;
pub mod turntable;

pub use bus::{BusError, BusResult, ClockInfo, MarkerBus, MarkerServer, MarkerSink, Outlet, Sample, Subscription};
pub use eyetracker::{
    AbsentGaze, DiscoveryTarget, EyeState, EyeTracker, EyeTrackerError, GazeBackend, GazeCall,
    GazeDevice, SimulatedGaze,
};
pub use force::{
    parse_line, pump, ForceError, ForceEvent, ForceSample, ForceSensorConfig, ForceSensorHandle,
    MarkerGate, SampleSource, TouchConfig, TouchDetector, TouchEvent,
};
pub use recorder::{RecorderControl, RecorderError, SessionRecorder, SimulatedRecorder};
pub use turntable::{
    parse_status, shortest_delta, BaySequence, MotorError, MotorSettings, SequenceCommand,
    SequenceEvent, SequenceState, SimulatedController, StepController, TicCmd, Turntable,
    TurntableConfig,
};
