use super::{ForceError, ForceEvent, MarkerGate, TouchConfig, TouchDetector, TouchEvent};
use crate::bus::{MarkerSink, Outlet};
use cuex_core::marker::TACTILE_TOUCH;
use std::io::{BufRead, BufReader, ErrorKind as IoErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const READ_POLL: Duration = Duration::from_millis(250);
const SIMULATED_PERIOD: Duration = Duration::from_millis(10);

/// Where samples come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleSource {
    /// TCP stream from the sensor host, optionally launched over SSH first.
    Remote,
    /// A synthetic touchbox that is pressed `touch_delay` after the gate
    /// opens.
    Simulated { touch_delay: Duration },
}

#[derive(Debug, Clone)]
pub struct ForceSensorConfig {
    pub source: SampleSource,
    pub host: String,
    pub port: u16,
    /// SSH target that runs `command` to start the remote sensor program.
    pub ssh_host: Option<String>,
    pub command: Option<String>,
    pub touch: TouchConfig,
    pub connect_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ForceSensorConfig {
    fn default() -> Self {
        Self {
            source: SampleSource::Remote,
            host: "127.0.0.1".to_string(),
            port: 5006,
            ssh_host: None,
            command: None,
            touch: TouchConfig::default(),
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Reads sample lines until EOF or `stop`, feeding each through the
/// detector. Malformed lines are skipped. Read timeouts only re-check
/// `stop`, so a socket with a read timeout can be pumped directly.
pub fn pump<R: BufRead>(
    mut reader: R,
    detector: &mut TouchDetector,
    stop: &AtomicBool,
    mut on_touch: impl FnMut(TouchEvent),
) -> Result<u64, ForceError> {
    let mut buf = Vec::new();
    let mut samples = 0;
    while !stop.load(Ordering::Acquire) {
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) if buf.last() != Some(&b'\n') => break,
            Ok(_) => {}
            Err(e) if matches!(e.kind(), IoErrorKind::WouldBlock | IoErrorKind::TimedOut) => {
                continue
            }
            Err(e) => return Err(e.into()),
        }
        let line = String::from_utf8_lossy(&buf);
        if !line.trim().is_empty() {
            match super::parse_line(&line) {
                Ok(sample) => {
                    samples += 1;
                    if let Some(touch) = detector.process(sample) {
                        on_touch(touch);
                    }
                }
                Err(e) => tracing::debug!("{e}"),
            }
        }
        buf.clear();
    }
    Ok(samples)
}

/// Owns the sensor worker thread. Dropping the handle stops the worker.
pub struct ForceSensorHandle {
    gate: MarkerGate,
    connected: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ForceSensorHandle {
    /// Starts the worker. Each rising-edge touch is published on `outlet`
    /// as `tactile_touch`, reported on `events`, and closes the gate.
    pub fn spawn(
        config: ForceSensorConfig,
        gate: MarkerGate,
        outlet: Option<Outlet>,
        events: Sender<ForceEvent>,
    ) -> Self {
        let connected = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            detector: TouchDetector::new(config.touch, gate.clone()),
            config,
            gate: gate.clone(),
            outlet,
            events,
            connected: Arc::clone(&connected),
            stop: Arc::clone(&stop),
        };
        let handle = std::thread::Builder::new()
            .name("force-sensor".into())
            .spawn(move || worker.run());
        let worker = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::error!("cannot start force sensor thread: {e}");
                None
            }
        };
        Self {
            gate,
            connected,
            stop,
            worker,
        }
    }

    pub fn gate(&self) -> &MarkerGate {
        &self.gate
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("force sensor thread panicked");
            }
        }
    }
}

impl Drop for ForceSensorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    config: ForceSensorConfig,
    detector: TouchDetector,
    gate: MarkerGate,
    outlet: Option<Outlet>,
    events: Sender<ForceEvent>,
    connected: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn run(mut self) {
        match self.config.source.clone() {
            SampleSource::Remote => self.run_remote(),
            SampleSource::Simulated { touch_delay } => self.run_simulated(touch_delay),
        }
        self.set_connected(false);
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::AcqRel) != connected {
            let event = if connected {
                ForceEvent::Connected
            } else {
                ForceEvent::Disconnected
            };
            let _ = self.events.send(event);
        }
    }

    fn emit(outlet: &Option<Outlet>, gate: &MarkerGate, events: &Sender<ForceEvent>, touch: TouchEvent) {
        if let Some(outlet) = outlet {
            if let Err(e) = outlet.publish(TACTILE_TOUCH) {
                tracing::error!("tactile marker not published: {e}");
            }
        }
        gate.disable();
        tracing::info!(raw = touch.raw, baseline = touch.baseline, "object touched");
        let _ = events.send(ForceEvent::Touch(touch));
    }

    fn launch_remote(&self) -> Option<Child> {
        let (host, command) = (self.config.ssh_host.as_deref()?, self.config.command.as_deref()?);
        let child = Command::new("ssh")
            .args(["-o", "BatchMode=yes", "-o", "ConnectTimeout=10", host, command])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match child {
            Ok(child) => {
                tracing::info!(%host, "force sensor program launched");
                Some(child)
            }
            Err(e) => {
                tracing::warn!(%host, "cannot launch force sensor program: {e}");
                None
            }
        }
    }

    fn connect(&self) -> Result<TcpStream, ForceError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let connect_err = |source| ForceError::Connect {
            addr: addr.clone(),
            source,
        };
        let mut last = std::io::Error::new(IoErrorKind::NotFound, "no address");
        for sock in addr.to_socket_addrs().map_err(connect_err)? {
            match TcpStream::connect_timeout(&sock, self.config.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(READ_POLL))?;
                    return Ok(stream);
                }
                Err(e) => last = e,
            }
        }
        Err(connect_err(last))
    }

    fn sleep_unless_stopped(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(READ_POLL.min(deadline - now));
        }
    }

    fn run_remote(&mut self) {
        let mut backoff = self.config.initial_backoff;
        let mut remote: Option<Child> = None;
        while !self.stopped() {
            let alive = remote
                .as_mut()
                .is_some_and(|c| matches!(c.try_wait(), Ok(None)));
            if !alive {
                remote = self.launch_remote();
            }

            match self.connect() {
                Ok(stream) => {
                    tracing::info!(host = %self.config.host, port = self.config.port, "force sensor connected");
                    self.set_connected(true);
                    backoff = self.config.initial_backoff;
                    self.detector.reset();
                    let (outlet, gate, events) = (&self.outlet, &self.gate, &self.events);
                    let result = pump(BufReader::new(stream), &mut self.detector, &self.stop, |t| {
                        Self::emit(outlet, gate, events, t)
                    });
                    self.set_connected(false);
                    match result {
                        Ok(n) => tracing::warn!(samples = n, "force sensor stream closed"),
                        Err(e) => tracing::warn!("force sensor stream failed: {e}"),
                    }
                }
                Err(e) => tracing::warn!(retry_in = ?backoff, "{e}"),
            }
            self.sleep_unless_stopped(backoff);
            backoff = next_backoff(backoff, self.config.max_backoff);
        }
        if let Some(mut child) = remote {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn run_simulated(&mut self, touch_delay: Duration) {
        let epoch = Instant::now();
        let mut opened_at: Option<Instant> = None;
        let mut pressed_until: Option<Instant> = None;
        let mut tick: u64 = 0;
        self.set_connected(true);
        tracing::info!("simulated force sensor running");

        while !self.stopped() {
            let now = Instant::now();
            if self.gate.is_enabled() {
                let opened = *opened_at.get_or_insert(now);
                if pressed_until.is_none() && now.duration_since(opened) >= touch_delay {
                    pressed_until = Some(now + Duration::from_millis(200));
                }
            } else {
                opened_at = None;
            }
            let pressed = pressed_until.is_some_and(|until| now < until);
            if pressed_until.is_some_and(|until| now >= until) {
                pressed_until = None;
            }

            let wobble = [0, 3, -2, 4, -3, 1][(tick % 6) as usize];
            let raw = (if pressed { 1800 } else { 1000 }) + wobble;
            let sample = super::ForceSample {
                timestamp: now.duration_since(epoch).as_secs_f64(),
                raw,
            };
            if let Some(touch) = self.detector.process(sample) {
                Self::emit(&self.outlet, &self.gate, &self.events, touch);
            }
            tick += 1;
            std::thread::sleep(SIMULATED_PERIOD);
        }
    }
}
