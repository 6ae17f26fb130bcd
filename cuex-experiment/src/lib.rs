//! Trial engine: the fixed state flow of one test, and a runner that turns
//! its effects into frames, markers and device calls.

pub mod behavior;
pub mod config;
pub mod engine;
pub mod instructions;
pub mod runner;
pub mod trial;

pub use behavior::{read_behavior_log, write_behavior_log, BehaviorLogError, BEHAVIOR_LOG};
pub use config::EngineConfig;
pub use engine::{Effect, EngineError, EngineEvent, TrialEngine};
pub use runner::{NoHooks, SessionHooks, TrialRunner};
pub use trial::ElementTiming;
