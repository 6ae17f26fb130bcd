//! Eye-tracker driver.
//!
//! The vendor SDK sits behind [`GazeBackend`] (discovery) and [`GazeDevice`]
//! (an opened tracker). [`EyeTracker`] owns the state machine
//! `Disconnected -> Connected -> Recording -> Connected` and mirrors every
//! marker onto the `eye_marker` outlet so both timelines can be aligned.

use crate::bus::{BusError, MarkerSink, Outlet};
use cuex_core::{Classify, ErrorKind, Marker};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(60);
const DISCOVERY_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeState {
    Disconnected,
    Connected,
    Recording,
}

impl fmt::Display for EyeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EyeState::Disconnected => "disconnected",
            EyeState::Connected => "connected",
            EyeState::Recording => "recording",
        })
    }
}

#[derive(Debug, Error)]
pub enum EyeTrackerError {
    #[error("cannot {action} while {state}")]
    BadState { action: &'static str, state: EyeState },

    #[error("no eye-tracker found within {0:?}")]
    DiscoveryTimeout(Duration),

    #[error("eye-tracker: {0}")]
    Device(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl Classify for EyeTrackerError {
    fn kind(&self) -> ErrorKind {
        match self {
            EyeTrackerError::DiscoveryTimeout(_) | EyeTrackerError::BadState { .. } => {
                ErrorKind::DeviceNotReady
            }
            EyeTrackerError::Device(_) | EyeTrackerError::Bus(_) => ErrorKind::DeviceFault,
        }
    }
}

pub type EyeResult<T> = Result<T, EyeTrackerError>;

/// Where to look for the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryTarget {
    /// Scan the local network for a wireless device.
    Scan,
    /// Connect to a known `host:port`.
    Address(String),
}

/// An opened tracker.
pub trait GazeDevice: Send {
    fn name(&self) -> String;
    fn start_recording(&mut self) -> Result<(), String>;
    fn stop_recording(&mut self) -> Result<(), String>;
    /// Injects a named event stamped with bus time, in seconds.
    fn send_event(&mut self, label: &str, bus_time: f64) -> Result<(), String>;
}

/// Finds trackers. `probe` is polled until it yields a device or the
/// discovery timeout expires.
pub trait GazeBackend: Send {
    fn probe(&mut self, target: &DiscoveryTarget) -> Result<Option<Box<dyn GazeDevice>>, String>;
}

pub struct EyeTracker<B: GazeBackend> {
    backend: B,
    device: Option<Box<dyn GazeDevice>>,
    state: EyeState,
    outlet: Option<Outlet>,
    discovery_timeout: Duration,
}

impl<B: GazeBackend> EyeTracker<B> {
    pub fn new(backend: B, outlet: Option<Outlet>) -> Self {
        Self {
            backend,
            device: None,
            state: EyeState::Disconnected,
            outlet,
            discovery_timeout: DISCOVERY_TIMEOUT,
        }
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn state(&self) -> EyeState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state != EyeState::Disconnected
    }

    fn require(&self, action: &'static str, expected: EyeState) -> EyeResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EyeTrackerError::BadState {
                action,
                state: self.state,
            })
        }
    }

    fn device(&mut self, action: &'static str) -> EyeResult<&mut Box<dyn GazeDevice>> {
        let state = self.state;
        self.device
            .as_mut()
            .ok_or(EyeTrackerError::BadState { action, state })
    }

    pub fn discover(&mut self, target: &DiscoveryTarget) -> EyeResult<String> {
        self.require("discover", EyeState::Disconnected)?;
        let deadline = Instant::now() + self.discovery_timeout;
        loop {
            match self.backend.probe(target) {
                Ok(Some(device)) => {
                    let name = device.name();
                    tracing::info!(device = %name, ?target, "eye-tracker connected");
                    self.device = Some(device);
                    self.state = EyeState::Connected;
                    return Ok(name);
                }
                Ok(None) => {}
                Err(e) => tracing::debug!("eye-tracker probe failed: {e}"),
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(?target, "eye-tracker discovery timed out");
                return Err(EyeTrackerError::DiscoveryTimeout(self.discovery_timeout));
            }
            std::thread::sleep(DISCOVERY_POLL.min(deadline - now));
        }
    }

    pub fn start_recording(&mut self) -> EyeResult<()> {
        self.require("start recording", EyeState::Connected)?;
        self.device("start recording")?
            .start_recording()
            .map_err(EyeTrackerError::Device)?;
        self.state = EyeState::Recording;
        tracing::info!("eye-tracker recording");
        Ok(())
    }

    pub fn stop_recording(&mut self) -> EyeResult<()> {
        self.require("stop recording", EyeState::Recording)?;
        self.device("stop recording")?
            .stop_recording()
            .map_err(EyeTrackerError::Device)?;
        self.state = EyeState::Connected;
        tracing::info!("eye-tracker recording stopped");
        Ok(())
    }

    /// Publishes `label` on the eye outlet and injects it into the
    /// tracker's own recording with the same bus timestamp.
    pub fn send_marker(&mut self, label: &str) -> EyeResult<Option<Marker>> {
        self.require("send marker", EyeState::Recording)?;
        let marker = match &self.outlet {
            Some(outlet) => Some(outlet.publish(label)?),
            None => None,
        };
        let bus_time = marker.as_ref().map(|m| m.timestamp).unwrap_or(0.0);
        self.device("send marker")?
            .send_event(label, bus_time)
            .map_err(EyeTrackerError::Device)?;
        Ok(marker)
    }

    /// Drops the device. A recording in progress is stopped first.
    pub fn disconnect(&mut self) {
        if self.state == EyeState::Recording {
            if let Err(e) = self.stop_recording() {
                tracing::warn!("eye-tracker stop on disconnect failed: {e}");
            }
        }
        self.device = None;
        self.state = EyeState::Disconnected;
    }
}

/// What a [`SimulatedGaze`] device has been asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum GazeCall {
    Start,
    Stop,
    Event(String, f64),
}

/// In-process tracker for dry runs. Clones share the call log.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGaze {
    calls: Arc<Mutex<Vec<GazeCall>>>,
    /// Probes that return nothing before the device appears.
    pub probes_before_found: u32,
}

impl SimulatedGaze {
    pub fn calls(&self) -> Vec<GazeCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn log(&self, call: GazeCall) -> Result<(), String> {
        self.calls
            .lock()
            .map(|mut c| c.push(call))
            .map_err(|_| "call log poisoned".to_string())
    }
}

impl GazeBackend for SimulatedGaze {
    fn probe(&mut self, _target: &DiscoveryTarget) -> Result<Option<Box<dyn GazeDevice>>, String> {
        if self.probes_before_found > 0 {
            self.probes_before_found -= 1;
            return Ok(None);
        }
        Ok(Some(Box::new(self.clone())))
    }
}

impl GazeDevice for SimulatedGaze {
    fn name(&self) -> String {
        "simulated".to_string()
    }

    fn start_recording(&mut self) -> Result<(), String> {
        self.log(GazeCall::Start)
    }

    fn stop_recording(&mut self) -> Result<(), String> {
        self.log(GazeCall::Stop)
    }

    fn send_event(&mut self, label: &str, bus_time: f64) -> Result<(), String> {
        self.log(GazeCall::Event(label.to_string(), bus_time))
    }
}

/// Never finds anything.
#[derive(Debug, Default)]
pub struct AbsentGaze;

impl GazeBackend for AbsentGaze {
    fn probe(&mut self, _target: &DiscoveryTarget) -> Result<Option<Box<dyn GazeDevice>>, String> {
        Ok(None)
    }
}
