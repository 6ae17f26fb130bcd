use crate::error::{SessionError, SessionResult};
use crate::link::{ControlLink, LinkEvent};
use crate::protocol::{ControlMessage, Readiness};
use cuex_catalog::{Resolved, StimulusCatalog};
use cuex_core::{Marker, StroopResponse, TestCondition};
use cuex_devices::{BusError, BusResult, MarkerSink};
use cuex_experiment::{EngineEvent, SessionHooks};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Instant;

/// Presentation side of the control channel: tracks host readiness and
/// turns host messages into engine events.
pub struct ClientController {
    link: ControlLink,
    events: Receiver<LinkEvent>,
    readiness: Readiness,
    touch_armed: Arc<AtomicBool>,
    last_status: Option<String>,
    connected: bool,
}

impl ClientController {
    pub fn new(link: ControlLink, events: Receiver<LinkEvent>) -> Self {
        Self {
            link,
            events,
            readiness: Readiness::default(),
            touch_armed: Arc::new(AtomicBool::new(false)),
            last_status: None,
            connected: true,
        }
    }

    pub fn link(&self) -> &ControlLink {
        &self.link
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Drains the link. A touch is forwarded only while the engine is
    /// waiting for one, and at most once per wait.
    pub fn poll(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            let msg = match event {
                LinkEvent::Message(msg) => msg,
                LinkEvent::Closed => {
                    if self.connected {
                        self.connected = false;
                        self.readiness = Readiness::default();
                        out.push(EngineEvent::DeviceFault("control link closed".into()));
                    }
                    continue;
                }
            };
            if self.readiness.apply(&msg) {
                tracing::info!(action = msg.action(), "host status");
                continue;
            }
            match msg {
                ControlMessage::ObjectTouched => {
                    if self.touch_armed.swap(false, Ordering::AcqRel) {
                        out.push(EngineEvent::Touched);
                    } else {
                        tracing::debug!("touch while not waiting; ignored");
                    }
                }
                ControlMessage::HostStatus { ref status } => {
                    if let Some(fault) = msg.fault_message() {
                        tracing::error!(%fault, "host fault");
                        out.push(EngineEvent::DeviceFault(fault.to_string()));
                    } else {
                        tracing::info!(%status, "host");
                    }
                    self.last_status = Some(status.clone());
                }
                ControlMessage::LatencyPing { timestamp } => {
                    if let Err(e) = self.link.send(&ControlMessage::LatencyPong { timestamp }) {
                        tracing::warn!("pong not sent: {e}");
                    }
                }
                other => tracing::debug!(action = other.action(), "client ignores message"),
            }
        }
        out
    }

    /// Refuses to start `test` while a device it needs is down, unless the
    /// operator overrides. Returns the devices the test starts without.
    pub fn check_start(&self, test: TestCondition, operator_override: bool) -> SessionResult<Vec<&'static str>> {
        if !self.connected {
            return Err(SessionError::LinkClosed);
        }
        let missing = self.readiness.missing(test);
        if missing.is_empty() {
            return Ok(missing);
        }
        if !operator_override {
            return Err(SessionError::NotReady(missing));
        }
        tracing::warn!(%test, ?missing, "operator started without every device");
        let message = format!("{test} started without {}", missing.join(", "));
        if let Err(e) = self.link.send(&ControlMessage::ClientLog { message }) {
            tracing::warn!("override not logged on host: {e}");
        }
        Ok(missing)
    }

    /// Resolves the sequence for `test` and records the shuffle seed in the
    /// host log.
    pub fn prepare(&self, catalog: &StimulusCatalog, test: TestCondition) -> Resolved {
        let resolved = catalog.resolve(test);
        match resolved.seed {
            Some(seed) => {
                tracing::info!(%test, seed, "sequence shuffled");
                let message = format!("seed {seed}");
                if let Err(e) = self.link.send(&ControlMessage::ClientLog { message }) {
                    tracing::warn!("seed not logged on host: {e}");
                }
            }
            None => tracing::info!(%test, "sequence in fixed order"),
        }
        resolved
    }

    pub fn markers(&self) -> RemoteLabels {
        RemoteLabels {
            link: self.link.clone(),
            epoch: Instant::now(),
        }
    }

    /// Hooks for the runner of one test. `sequence` is the resolved basename
    /// list sent along with the start so the host can drive the turntable.
    pub fn hooks(&self, sequence: Option<Vec<String>>) -> ClientHooks {
        ClientHooks {
            link: self.link.clone(),
            touch_armed: Arc::clone(&self.touch_armed),
            sequence,
        }
    }
}

/// Sends each marker to the host, which stamps it on the bus. The returned
/// timestamp is local and only used for logging.
#[derive(Clone)]
pub struct RemoteLabels {
    link: ControlLink,
    epoch: Instant,
}

impl MarkerSink for RemoteLabels {
    fn publish(&self, label: &str) -> BusResult<Marker> {
        if label.is_empty() {
            return Err(BusError::EmptyLabel);
        }
        self.link
            .send(&ControlMessage::Label { label: label.to_string() })
            .map_err(|e| {
                tracing::error!(label, "label not sent: {e}");
                BusError::Closed
            })?;
        Ok(Marker {
            label: label.to_string(),
            timestamp: self.epoch.elapsed().as_secs_f64(),
        })
    }
}

pub struct ClientHooks {
    link: ControlLink,
    touch_armed: Arc<AtomicBool>,
    sequence: Option<Vec<String>>,
}

impl SessionHooks for ClientHooks {
    fn start_recording(&mut self, test: TestCondition) -> anyhow::Result<()> {
        self.link.send(&ControlMessage::start(test, self.sequence.clone()))?;
        Ok(())
    }

    fn stop_recording(&mut self, test: TestCondition) -> anyhow::Result<()> {
        self.touch_armed.store(false, Ordering::Release);
        self.link.send(&ControlMessage::stop(test))?;
        Ok(())
    }

    fn set_touch_gate(&mut self, enabled: bool) -> anyhow::Result<()> {
        self.touch_armed.store(enabled, Ordering::Release);
        if enabled {
            self.link.send(&ControlMessage::TouchboxLslTrue)?;
        }
        Ok(())
    }

    fn pause_devices(&mut self, test: TestCondition) -> anyhow::Result<()> {
        self.link.send(&ControlMessage::pause(test))?;
        Ok(())
    }

    fn resume_devices(&mut self, test: TestCondition) -> anyhow::Result<()> {
        self.link.send(&ControlMessage::resume(test))?;
        Ok(())
    }

    fn record_response(&mut self, response: &StroopResponse) {
        tracing::info!(answer = %response.answer, elapsed_s = response.elapsed_s, "response");
    }

    fn fault(&mut self, message: &str) {
        let message = format!("client fault: {message}");
        if let Err(e) = self.link.send(&ControlMessage::ClientLog { message }) {
            tracing::warn!("fault not reported to host: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ControlListener;
    use std::time::Duration;

    fn pair() -> (ClientController, ControlLink, Receiver<LinkEvent>) {
        let listener = ControlListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (link, rx) = ControlLink::connect(&addr, Duration::from_secs(1)).unwrap();
        let (host, host_rx) = listener.accept().unwrap();
        (ClientController::new(link, rx), host, host_rx)
    }

    fn poll_until(client: &mut ClientController, mut done: impl FnMut(&ClientController, &[EngineEvent]) -> bool) -> Vec<EngineEvent> {
        let mut all = Vec::new();
        for _ in 0..200 {
            all.extend(client.poll());
            if done(client, &all) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        all
    }

    #[test]
    fn start_waits_for_devices() {
        let (mut client, host, _) = pair();
        let test = TestCondition::MultisensoryNeutralTactile;
        assert!(matches!(client.check_start(test, false), Err(SessionError::NotReady(m)) if m.len() == 3));

        for msg in (Readiness { recorder: true, eyetracker: true, tactile: true }).messages() {
            host.send(&msg).unwrap();
        }
        poll_until(&mut client, |c, _| c.readiness().tactile);
        assert_eq!(client.check_start(test, false).unwrap(), Vec::<&str>::new());
    }

    #[test]
    fn operator_can_start_without_the_eye_tracker() {
        let (mut client, host, host_rx) = pair();
        let test = TestCondition::UnisensoryAlcoholVisual;
        for msg in (Readiness { recorder: true, eyetracker: false, tactile: false }).messages() {
            host.send(&msg).unwrap();
        }
        poll_until(&mut client, |c, _| c.readiness().recorder);

        assert!(matches!(
            client.check_start(test, false),
            Err(SessionError::NotReady(m)) if m == vec!["eye-tracker"]
        ));
        assert_eq!(client.check_start(test, true).unwrap(), vec!["eye-tracker"]);
        assert_eq!(
            host_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            LinkEvent::Message(ControlMessage::ClientLog {
                message: "Unisensory Alcohol Visual started without eye-tracker".into()
            })
        );
    }

    #[test]
    fn pause_and_resume_reach_the_host() {
        let (client, _host, host_rx) = pair();
        let mut hooks = client.hooks(None);
        let test = TestCondition::MultisensoryNeutralTactile;
        hooks.pause_devices(test).unwrap();
        hooks.resume_devices(test).unwrap();
        for msg in [ControlMessage::pause(test), ControlMessage::resume(test)] {
            assert_eq!(host_rx.recv_timeout(Duration::from_secs(1)).unwrap(), LinkEvent::Message(msg));
        }
    }

    #[test]
    fn touch_is_forwarded_once_per_wait() {
        let (mut client, host, host_rx) = pair();
        let mut hooks = client.hooks(None);

        host.send(&ControlMessage::ObjectTouched).unwrap();
        host.send(&ControlMessage::status("sync")).unwrap();
        let early = poll_until(&mut client, |c, _| c.last_status() == Some("sync"));
        assert!(early.is_empty());

        hooks.set_touch_gate(true).unwrap();
        assert_eq!(
            host_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            LinkEvent::Message(ControlMessage::TouchboxLslTrue)
        );
        host.send(&ControlMessage::ObjectTouched).unwrap();
        host.send(&ControlMessage::ObjectTouched).unwrap();
        host.send(&ControlMessage::status("sync2")).unwrap();
        let events = poll_until(&mut client, |c, _| c.last_status() == Some("sync2"));
        assert_eq!(events, vec![EngineEvent::Touched]);
    }

    #[test]
    fn fault_status_becomes_device_fault() {
        let (mut client, host, _) = pair();
        host.send(&ControlMessage::fault("carousel stalled")).unwrap();
        let events = poll_until(&mut client, |_, e| !e.is_empty());
        assert_eq!(events, vec![EngineEvent::DeviceFault("carousel stalled".into())]);
    }

    #[test]
    fn labels_and_lifecycle_reach_the_host() {
        let (client, _host, host_rx) = pair();
        let markers = client.markers();
        let mut hooks = client.hooks(Some(vec!["beer".into()]));
        let test = TestCondition::StroopAlcoholTactile;

        hooks.start_recording(test).unwrap();
        markers.publish("beer Image").unwrap();
        assert!(matches!(markers.publish(""), Err(BusError::EmptyLabel)));
        hooks.stop_recording(test).unwrap();

        let expected = [
            ControlMessage::start(test, Some(vec!["beer".into()])),
            ControlMessage::Label { label: "beer Image".into() },
            ControlMessage::stop(test),
        ];
        for msg in expected {
            assert_eq!(host_rx.recv_timeout(Duration::from_secs(1)).unwrap(), LinkEvent::Message(msg));
        }
    }

    #[test]
    fn lost_host_is_reported_once() {
        let (mut client, host, _) = pair();
        host.shutdown();
        let events = poll_until(&mut client, |c, _| !c.is_connected());
        assert_eq!(events, vec![EngineEvent::DeviceFault("control link closed".into())]);
        assert!(client.poll().is_empty());
        assert!(matches!(client.check_start(TestCondition::UnisensoryNeutralVisual, false), Err(SessionError::LinkClosed)));
        assert!(matches!(client.check_start(TestCondition::UnisensoryNeutralVisual, true), Err(SessionError::LinkClosed)));
    }
}
