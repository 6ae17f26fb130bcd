//! Marker bus: named string outlets with a shared monotonic clock.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  publish   ┌──────────────┐  fan-out  ┌──────────────┐
//! │  Outlet  │──────────► │ writer queue │─────────► │ Subscription │
//! │ "labels" │            │ (one thread) │           │  (recorder)  │
//! └──────────┘            └──────────────┘           └──────────────┘
//! ```
//!
//! Publishing never blocks on subscribers: samples go onto a single-writer
//! queue and one thread fans them out. A bus with no subscribers still
//! accepts every sample.

use cuex_core::Marker;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("marker label is empty")]
    EmptyLabel,

    #[error("marker bus writer has shut down")]
    Closed,

    #[error("lock poisoned")]
    Poisoned,

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}

impl cuex_core::Classify for BusError {
    fn kind(&self) -> cuex_core::ErrorKind {
        cuex_core::ErrorKind::DeviceFault
    }
}

pub type BusResult<T> = Result<T, BusError>;

/// One published marker and the outlet it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub outlet: String,
    pub seq: u64,
    #[serde(flatten)]
    pub marker: Marker,
}

/// Relates bus time to wall-clock time for offline alignment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockInfo {
    /// Unix time, in seconds, at which bus time was zero.
    pub epoch_unix_s: f64,
    /// Bus time when this record was taken.
    pub local_clock_s: f64,
}

/// Anything that can take a marker label. The trial runner publishes
/// through this so tests can capture markers without a bus.
pub trait MarkerSink {
    fn publish(&self, label: &str) -> BusResult<Marker>;
}

struct BusShared {
    epoch: Instant,
    epoch_unix_s: f64,
    queue: Mutex<Sender<Sample>>,
    subscribers: Arc<Mutex<Vec<Sender<Sample>>>>,
    outlets: Mutex<Vec<String>>,
}

/// Time-synchronized publish/subscribe channel for string markers.
#[derive(Clone)]
pub struct MarkerBus {
    shared: Arc<BusShared>,
}

impl MarkerBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Sample>();
        let subscribers: Arc<Mutex<Vec<Sender<Sample>>>> = Arc::default();
        let fanout = Arc::clone(&subscribers);
        std::thread::Builder::new()
            .name("marker-bus".into())
            .spawn(move || {
                for sample in rx {
                    if let Ok(mut subs) = fanout.lock() {
                        subs.retain(|s| s.send(sample.clone()).is_ok());
                    }
                }
            })
            .ok();

        let epoch_unix_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        Self {
            shared: Arc::new(BusShared {
                epoch: Instant::now(),
                epoch_unix_s,
                queue: Mutex::new(tx),
                subscribers,
                outlets: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Seconds since the bus was created.
    pub fn local_clock(&self) -> f64 {
        self.shared.epoch.elapsed().as_secs_f64()
    }

    pub fn clock_info(&self) -> ClockInfo {
        ClockInfo {
            epoch_unix_s: self.shared.epoch_unix_s,
            local_clock_s: self.local_clock(),
        }
    }

    /// Creates a named outlet. Names need not be unique; every outlet keeps
    /// its own ordering.
    pub fn outlet(&self, name: &str) -> Outlet {
        if let Ok(mut outlets) = self.shared.outlets.lock() {
            if !outlets.iter().any(|o| o == name) {
                outlets.push(name.to_string());
            }
        }
        tracing::debug!(outlet = name, "marker outlet created");
        Outlet {
            name: name.to_string(),
            bus: self.clone(),
            state: Arc::new(Mutex::new(OutletState::default())),
        }
    }

    pub fn outlets(&self) -> Vec<String> {
        self.shared
            .outlets
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    /// Receives every sample published on any outlet from now on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subs) = self.shared.subscribers.lock() {
            subs.push(tx);
        }
        Subscription { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for MarkerBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct OutletState {
    last_timestamp: f64,
    seq: u64,
}

/// Named producer on the bus. Clones share ordering and timestamps.
#[derive(Clone)]
pub struct Outlet {
    name: String,
    bus: MarkerBus,
    state: Arc<Mutex<OutletState>>,
}

impl Outlet {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl MarkerSink for Outlet {
    /// Stamps and enqueues `label`. Timestamps never decrease on one outlet
    /// even when several threads publish through clones of it.
    fn publish(&self, label: &str) -> BusResult<Marker> {
        if label.is_empty() {
            return Err(BusError::EmptyLabel);
        }
        let mut state = self.state.lock().map_err(|_| BusError::Poisoned)?;
        let timestamp = self.bus.local_clock().max(state.last_timestamp);
        state.last_timestamp = timestamp;
        state.seq += 1;

        let marker = Marker {
            label: label.to_string(),
            timestamp,
        };
        let sample = Sample {
            outlet: self.name.clone(),
            seq: state.seq,
            marker: marker.clone(),
        };
        self.bus
            .shared
            .queue
            .lock()
            .map_err(|_| BusError::Poisoned)?
            .send(sample)
            .map_err(|_| BusError::Closed)?;

        tracing::info!(outlet = %self.name, label, timestamp, "marker");
        Ok(marker)
    }
}

pub struct Subscription {
    rx: Receiver<Sample>,
}

impl Subscription {
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Sample> {
        match self.rx.recv_timeout(timeout) {
            Ok(sample) => Some(sample),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_iter(&self) -> impl Iterator<Item = Sample> + '_ {
        self.rx.try_iter()
    }
}

/// Streams the bus to TCP subscribers. Each connection first receives a
/// `CUEX:streaminfo/<len>:` header with the outlet list and clock info as
/// JSON, then one JSON sample per line.
pub struct MarkerServer {
    listener: TcpListener,
    bus: MarkerBus,
}

#[derive(Serialize)]
struct StreamInfo<'a> {
    outlets: &'a [String],
    clock: ClockInfo,
    hostname: String,
}

impl MarkerServer {
    pub fn bind(bus: MarkerBus, addr: SocketAddr) -> BusResult<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener, bus })
    }

    pub fn local_addr(&self) -> BusResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts subscribers on a background thread.
    pub fn spawn(self) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            for stream in self.listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let subscription = self.bus.subscribe();
                        let bus = self.bus.clone();
                        std::thread::spawn(move || {
                            if let Err(e) = serve_client(stream, &bus, subscription) {
                                tracing::debug!("marker subscriber left: {e}");
                            }
                        });
                    }
                    Err(e) => tracing::warn!("marker server accept failed: {e}"),
                }
            }
        })
    }
}

fn serve_client(mut stream: TcpStream, bus: &MarkerBus, subscription: Subscription) -> BusResult<()> {
    stream.set_nodelay(true)?;
    let outlets = bus.outlets();
    let info = StreamInfo {
        outlets: &outlets,
        clock: bus.clock_info(),
        hostname: std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "localhost".to_string()),
    };
    let json = serde_json::to_string(&info).map_err(std::io::Error::other)?;
    writeln!(stream, "CUEX:streaminfo/{}:{}", json.len(), json)?;

    for sample in subscription.rx {
        let line = serde_json::to_string(&sample).map_err(std::io::Error::other)?;
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
    }
    Ok(())
}
