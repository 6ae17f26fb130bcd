use std::time::Duration;

/// A deadline on a nanosecond clock that can be frozen and resumed.
///
/// Time spent paused does not count toward the duration; after
/// `resume` the countdown finishes the remainder it had left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    duration_ns: u64,
    started_at: u64,
    banked_ns: u64,
    paused: bool,
}

impl Countdown {
    pub fn start(now_ns: u64, duration: Duration) -> Self {
        Self {
            duration_ns: duration.as_nanos() as u64,
            started_at: now_ns,
            banked_ns: 0,
            paused: false,
        }
    }

    /// Resumes a countdown that already ran for `elapsed`.
    pub fn resume_from(now_ns: u64, duration: Duration, elapsed: Duration) -> Self {
        Self {
            duration_ns: duration.as_nanos() as u64,
            started_at: now_ns,
            banked_ns: elapsed.as_nanos() as u64,
            paused: false,
        }
    }

    pub fn elapsed(&self, now_ns: u64) -> Duration {
        let running = if self.paused {
            0
        } else {
            now_ns.saturating_sub(self.started_at)
        };
        Duration::from_nanos(self.banked_ns + running)
    }

    pub fn remaining(&self, now_ns: u64) -> Duration {
        Duration::from_nanos(self.duration_ns).saturating_sub(self.elapsed(now_ns))
    }

    pub fn is_done(&self, now_ns: u64) -> bool {
        self.elapsed(now_ns).as_nanos() as u64 >= self.duration_ns
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_ns)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self, now_ns: u64) {
        if !self.paused {
            self.banked_ns = self.elapsed(now_ns).as_nanos() as u64;
            self.paused = true;
        }
    }

    pub fn resume(&mut self, now_ns: u64) {
        if self.paused {
            self.started_at = now_ns;
            self.paused = false;
        }
    }
}
