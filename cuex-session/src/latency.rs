//! Round-trip latency check of the control channel.

use crate::error::{SessionError, SessionResult};
use crate::link::{ControlLink, LinkEvent};
use crate::protocol::ControlMessage;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct LatencyProbe {
    pub count: usize,
    pub interval: Duration,
    /// Give up when no pong arrives for this long.
    pub abort_after: Duration,
    pub threshold: Duration,
}

impl Default for LatencyProbe {
    fn default() -> Self {
        Self {
            count: 50,
            interval: Duration::from_millis(100),
            abort_after: Duration::from_secs(5),
            threshold: Duration::from_millis(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatencyReport {
    pub sent: usize,
    pub received: usize,
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub aborted: bool,
    pub threshold_ms: f64,
}

impl LatencyReport {
    pub fn within_threshold(&self) -> bool {
        self.received > 0 && self.average_ms <= self.threshold_ms
    }

    pub fn check(&self) -> SessionResult<()> {
        if self.within_threshold() {
            Ok(())
        } else {
            Err(SessionError::LatencyExceeded {
                average_ms: self.average_ms,
                threshold_ms: self.threshold_ms,
            })
        }
    }
}

fn wall_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

impl LatencyProbe {
    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sends `count` pings and measures each round trip. Pongs are matched
    /// by the echoed timestamp; anything else read meanwhile goes to
    /// `on_other`.
    pub fn run(
        &self,
        link: &ControlLink,
        events: &Receiver<LinkEvent>,
        mut on_other: impl FnMut(ControlMessage),
    ) -> SessionResult<LatencyReport> {
        let mut rtts: Vec<f64> = Vec::with_capacity(self.count);
        let mut sent = 0;
        let mut aborted = false;

        'pings: for _ in 0..self.count {
            let stamp = wall_clock();
            let started = Instant::now();
            link.send(&ControlMessage::LatencyPing { timestamp: stamp })?;
            sent += 1;
            loop {
                let waited = started.elapsed();
                if waited >= self.abort_after {
                    tracing::warn!(sent, received = rtts.len(), "no pong within {:?}; aborting", self.abort_after);
                    aborted = true;
                    break 'pings;
                }
                match events.recv_timeout(self.abort_after - waited) {
                    Ok(LinkEvent::Message(ControlMessage::LatencyPong { timestamp })) if timestamp == stamp => {
                        let rtt = started.elapsed().as_secs_f64() * 1000.0;
                        tracing::debug!(rtt_ms = rtt, "pong");
                        rtts.push(rtt);
                        break;
                    }
                    Ok(LinkEvent::Message(ControlMessage::LatencyPong { .. })) => {
                        tracing::debug!("stale pong dropped");
                    }
                    Ok(LinkEvent::Message(other)) => on_other(other),
                    Ok(LinkEvent::Closed) | Err(RecvTimeoutError::Disconnected) => return Err(SessionError::LinkClosed),
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            std::thread::sleep(self.interval);
        }

        if rtts.is_empty() {
            return Err(SessionError::NoReplies(self.abort_after));
        }
        let received = rtts.len();
        let report = LatencyReport {
            sent,
            received,
            average_ms: rtts.iter().sum::<f64>() / received as f64,
            min_ms: rtts.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: rtts.iter().copied().fold(0.0, f64::max),
            aborted,
            threshold_ms: self.threshold.as_secs_f64() * 1000.0,
        };
        tracing::info!(
            sent,
            received,
            average_ms = report.average_ms,
            min_ms = report.min_ms,
            max_ms = report.max_ms,
            "latency test finished"
        );
        Ok(report)
    }
}
