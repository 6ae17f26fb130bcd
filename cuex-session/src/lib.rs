//! Host/client session control: configuration, the subject's output
//! folders, the line-JSON control channel between the presentation
//! machine and the recording machine, and the latency check.

pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod latency;
pub mod link;
pub mod protocol;
pub mod session;

pub use client::{ClientController, ClientHooks, RemoteLabels};
pub use config::{
    Config, ExperimentSection, HardwareConfig, LoggingConfig, NetworkConfig, PathsConfig, PlatformConfig, Role,
};
pub use error::{ConfigError, SessionError, SessionResult};
pub use host::{HostController, HostDevices};
pub use latency::{LatencyProbe, LatencyReport};
pub use link::{ControlLink, ControlListener, LinkEvent};
pub use protocol::{decode, encode, ControlMessage, ProtocolError, Readiness, FAULT_PREFIX};
pub use session::Session;
