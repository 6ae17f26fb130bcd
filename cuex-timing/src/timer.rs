use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const FRAME_HISTORY: usize = 1000;

/// Monotonic clock shared by the trial engine, the presenter and the drivers.
pub trait Timer: Clone + Send + Sync {
    type Timestamp: Copy + Clone + Send + Sync;
    fn now(&self) -> Self::Timestamp;
    fn elapsed(&self, ts: Self::Timestamp) -> Duration;
    fn sleep(&self, d: Duration);
    fn record_frame(&mut self, d: Duration);
    fn calibration_stats(&self) -> CalibrationStats;
}

/// Frame pacing over the recorded history, in nanoseconds.
#[derive(Debug, Clone, Default)]
pub struct CalibrationStats {
    pub average_frame_time_ns: f64,
    pub jitter_ns: f64,
    pub min_frame_time_ns: f64,
    pub max_frame_time_ns: f64,
    pub effective_fps: f64,
}

/// Bounded history of frame intervals; the oldest entry drops out first.
#[derive(Debug, Clone)]
struct FrameLog {
    intervals: VecDeque<Duration>,
    capacity: usize,
}

impl FrameLog {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            intervals: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, d: Duration) {
        if self.intervals.len() == self.capacity {
            self.intervals.pop_front();
        }
        self.intervals.push_back(d);
    }

    fn stats(&self) -> CalibrationStats {
        let n = self.intervals.len();
        if n == 0 {
            return CalibrationStats::default();
        }
        let ns = || self.intervals.iter().map(|d| d.as_nanos() as f64);
        let mean = ns().sum::<f64>() / n as f64;
        let variance = ns().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;
        let (min, max) = ns().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)));
        CalibrationStats {
            average_frame_time_ns: mean,
            jitter_ns: variance.sqrt(),
            min_frame_time_ns: min,
            max_frame_time_ns: max,
            effective_fps: if mean > 0.0 { 1e9 / mean } else { 0.0 },
        }
    }
}

impl Default for FrameLog {
    fn default() -> Self {
        Self::with_capacity(FRAME_HISTORY)
    }
}

/// Wall-clock timer measured from its creation. Clones keep the same
/// origin, so timestamps taken through any clone compare directly.
#[derive(Debug, Clone)]
pub struct HighPrecisionTimer {
    origin: Instant,
    frames: FrameLog,
}

impl HighPrecisionTimer {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            frames: FrameLog::default(),
        }
    }

    /// The instant timestamps are counted from.
    pub fn origin(&self) -> Instant {
        self.origin
    }

    pub fn high_precision_sleep(&self, duration: Duration) {
        #[cfg(target_os = "linux")]
        monotonic_sleep(duration);
        #[cfg(not(target_os = "linux"))]
        std::thread::sleep(duration);
    }
}

#[cfg(target_os = "linux")]
fn monotonic_sleep(duration: Duration) {
    let req = libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    };
    // SAFETY: `req` outlives the call and the remainder pointer may be null.
    let rc = unsafe { libc::clock_nanosleep(libc::CLOCK_MONOTONIC, 0, &req, std::ptr::null_mut()) };
    if rc != 0 {
        tracing::debug!(rc, "clock_nanosleep interrupted, falling back");
        std::thread::sleep(duration);
    }
}

impl Default for HighPrecisionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for HighPrecisionTimer {
    type Timestamp = u64;

    fn now(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn elapsed(&self, ts: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(ts))
    }

    fn sleep(&self, d: Duration) {
        self.high_precision_sleep(d)
    }

    fn record_frame(&mut self, d: Duration) {
        self.frames.push(d);
    }

    fn calibration_stats(&self) -> CalibrationStats {
        self.frames.stats()
    }
}

/// Clock that only moves when told to. Clones share the same time, so a test
/// can hold one handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    now_ns: Arc<AtomicU64>,
    frames: FrameLog,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, d: Duration) {
        self.now_ns.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    pub fn set_ns(&self, ns: u64) {
        self.now_ns.store(ns, Ordering::SeqCst);
    }
}

impl Timer for ManualTimer {
    type Timestamp = u64;

    fn now(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }

    fn elapsed(&self, since: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(since))
    }

    /// Sleeping advances the shared clock instead of blocking.
    fn sleep(&self, d: Duration) {
        self.advance(d);
    }

    fn record_frame(&mut self, d: Duration) {
        self.frames.push(d);
    }

    fn calibration_stats(&self) -> CalibrationStats {
        self.frames.stats()
    }
}
