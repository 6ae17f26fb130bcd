//! Force-sensor driver: sample parsing, baseline tracking and touch edges,
//! and the reconnecting stream from the remote sensor host.

mod detector;
mod stream;

pub use detector::{TouchConfig, TouchDetector, TouchEvent};
pub use stream::{pump, ForceSensorConfig, ForceSensorHandle, SampleSource};

use cuex_core::{Classify, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForceError {
    #[error("malformed force sample {0:?}")]
    Malformed(String),

    #[error("force sensor at {addr} unreachable: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("force sensor stream: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for ForceError {
    fn kind(&self) -> ErrorKind {
        match self {
            ForceError::Malformed(_) => ErrorKind::ProtocolError,
            ForceError::Connect { .. } => ErrorKind::DeviceNotReady,
            ForceError::Io(_) => ErrorKind::DeviceFault,
        }
    }
}

/// One reading from the sensor: sensor time in seconds and raw force.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceSample {
    pub timestamp: f64,
    pub raw: i64,
}

/// Parses one `"<timestamp>,<raw_force_int>"` line.
pub fn parse_line(line: &str) -> Result<ForceSample, ForceError> {
    let malformed = || ForceError::Malformed(line.to_string());
    let (ts, raw) = line.trim().split_once(',').ok_or_else(malformed)?;
    let timestamp: f64 = ts.trim().parse().map_err(|_| malformed())?;
    let raw: i64 = raw
        .trim()
        .parse()
        .or_else(|_| raw.trim().parse::<f64>().map(|f| f.round() as i64))
        .map_err(|_| malformed())?;
    if !timestamp.is_finite() {
        return Err(malformed());
    }
    Ok(ForceSample { timestamp, raw })
}

/// The `markers_enabled` flag. The trial side writes it, the sensor thread
/// reads it; clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct MarkerGate(Arc<AtomicBool>);

impl MarkerGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What the sensor worker reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ForceEvent {
    Connected,
    Disconnected,
    Touch(TouchEvent),
}
