use crate::link::{ControlLink, LinkEvent};
use crate::protocol::{ControlMessage, Readiness};
use crate::session::Session;
use cuex_catalog::BayAssignment;
use cuex_core::marker::LABELS_OUTLET;
use cuex_core::{Classify, TestCondition};
use cuex_devices::{
    BaySequence, EyeState, EyeTracker, ForceEvent, ForceSensorHandle, GazeBackend, MarkerBus, MarkerSink, Outlet,
    SequenceCommand, SequenceEvent, SessionRecorder, Turntable,
};
use cuex_devices::recorder::DEFAULT_TEMPLATE;
use cuex_timing::HighPrecisionTimer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(20);

/// Devices the host process drives. Absent devices are reported as not
/// ready and their commands are skipped.
pub struct HostDevices<B: GazeBackend> {
    pub bus: MarkerBus,
    pub recorder: Box<dyn SessionRecorder>,
    pub eye: Option<EyeTracker<B>>,
    pub force: Option<(ForceSensorHandle, Receiver<ForceEvent>)>,
    pub turntable: Option<Arc<Turntable>>,
}

struct ActiveSequence {
    commands: Sender<SequenceCommand>,
    events: Receiver<SequenceEvent>,
}

/// Owns the recorder, the marker outlet and the hardware, and answers the
/// client's control messages.
pub struct HostController<B: GazeBackend> {
    session: Session,
    labels: Outlet,
    recorder: Box<dyn SessionRecorder>,
    eye: Option<EyeTracker<B>>,
    force: Option<ForceSensorHandle>,
    force_events: Option<Receiver<ForceEvent>>,
    turntable: Option<Arc<Turntable>>,
    bays: BayAssignment,
    turntable_dwell: Duration,
    sequence: Option<ActiveSequence>,
    active_test: Option<TestCondition>,
    announced: Option<Readiness>,
}

impl<B: GazeBackend> HostController<B> {
    pub fn new(session: Session, devices: HostDevices<B>, bays: BayAssignment, turntable_dwell: Duration) -> Self {
        let (force, force_events) = match devices.force {
            Some((handle, events)) => (Some(handle), Some(events)),
            None => (None, None),
        };
        Self {
            session,
            labels: devices.bus.outlet(LABELS_OUTLET),
            recorder: devices.recorder,
            eye: devices.eye,
            force,
            force_events,
            turntable: devices.turntable,
            bays,
            turntable_dwell,
            sequence: None,
            active_test: None,
            announced: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn active_test(&self) -> Option<TestCondition> {
        self.active_test
    }

    pub fn readiness(&self) -> Readiness {
        Readiness {
            recorder: self.recorder.is_connected(),
            eyetracker: self.eye.as_ref().is_some_and(EyeTracker::is_connected),
            tactile: self.force.as_ref().is_some_and(ForceSensorHandle::is_connected),
        }
    }

    pub fn recorder(&self) -> &dyn SessionRecorder {
        self.recorder.as_ref()
    }

    /// Serves one client until it disconnects or `stop` is raised. A test
    /// still running at that point is stopped.
    pub fn serve(&mut self, link: &ControlLink, events: &Receiver<LinkEvent>, stop: &AtomicBool) {
        self.announced = None;
        while !stop.load(Ordering::Acquire) {
            let mut outgoing = self.poll_devices();
            match events.recv_timeout(POLL) {
                Ok(LinkEvent::Message(msg)) => outgoing.extend(self.handle(msg)),
                Ok(LinkEvent::Closed) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            if let Err(e) = outgoing.iter().try_for_each(|msg| link.send(msg)) {
                tracing::warn!(peer = %link.peer(), "control link lost: {e}");
                break;
            }
        }
        if let Some(test) = self.active_test {
            tracing::warn!(%test, "client gone; stopping test");
            self.stop_test(test);
        }
    }

    /// Applies one client message and returns the replies.
    pub fn handle(&mut self, msg: ControlMessage) -> Vec<ControlMessage> {
        match msg {
            ControlMessage::StartButton { test, sequence } => self.on_start(&test, sequence),
            ControlMessage::StopButton { test } => match test.parse::<TestCondition>() {
                Ok(test) => self.stop_test(test),
                Err(e) => {
                    tracing::warn!("stop ignored: {e}");
                    vec![ControlMessage::status(format!("stop ignored: {e}"))]
                }
            },
            ControlMessage::PauseButton { test } => self.hold(&test, true),
            ControlMessage::ResumeButton { test } => self.hold(&test, false),
            ControlMessage::Label { label } => {
                self.publish_label(&label);
                Vec::new()
            }
            ControlMessage::TouchboxLslTrue => {
                match &self.force {
                    Some(force) => {
                        force.gate().enable();
                        tracing::debug!("touch gate enabled");
                    }
                    None => tracing::warn!("touch gate requested without a force sensor"),
                }
                Vec::new()
            }
            ControlMessage::LatencyPing { timestamp } => vec![ControlMessage::LatencyPong { timestamp }],
            ControlMessage::ClientLog { message } => {
                tracing::info!(target: "client", "{message}");
                Vec::new()
            }
            other => {
                tracing::debug!(action = other.action(), "host ignores message");
                Vec::new()
            }
        }
    }

    /// Drains device events and reports readiness changes.
    pub fn poll_devices(&mut self) -> Vec<ControlMessage> {
        let mut out = Vec::new();

        let touches = self
            .force_events
            .as_ref()
            .map(|rx| rx.try_iter().collect::<Vec<_>>())
            .unwrap_or_default();
        for event in touches {
            match event {
                ForceEvent::Touch(touch) => {
                    tracing::info!(raw = touch.raw, baseline = touch.baseline, "object touched");
                    out.push(ControlMessage::ObjectTouched);
                    self.command_sequence(SequenceCommand::Open);
                }
                ForceEvent::Connected => tracing::info!("force sensor connected"),
                ForceEvent::Disconnected => tracing::warn!("force sensor disconnected"),
            }
        }

        let seq_events = self
            .sequence
            .as_ref()
            .map(|s| s.events.try_iter().collect::<Vec<_>>())
            .unwrap_or_default();
        for event in seq_events {
            match event {
                SequenceEvent::Ready { index, bay } => {
                    tracing::info!(index, bay, "bay ready");
                    out.push(ControlMessage::status(format!("bay {bay} ready")));
                }
                SequenceEvent::Fault(msg) => {
                    tracing::error!(%msg, "turntable fault");
                    out.push(ControlMessage::fault(format!("turntable: {msg}")));
                }
                SequenceEvent::Done | SequenceEvent::Stopped => {
                    tracing::info!(?event, "bay sequence finished");
                    self.sequence = None;
                }
                other => tracing::debug!(?other, "bay sequence"),
            }
        }

        let now = self.readiness();
        if self.announced != Some(now) {
            tracing::info!(recorder = now.recorder, eyetracker = now.eyetracker, tactile = now.tactile, "device readiness");
            out.extend(now.messages());
            self.announced = Some(now);
        }
        out
    }

    fn on_start(&mut self, name: &str, sequence: Option<Vec<String>>) -> Vec<ControlMessage> {
        let test = match name.parse::<TestCondition>() {
            Ok(test) => test,
            Err(e) => {
                tracing::warn!("start ignored: {e}");
                return vec![ControlMessage::status(format!("start ignored: {e}"))];
            }
        };
        if let Err(e) = self.session.check(test) {
            tracing::warn!("start ignored: {e}");
            return vec![ControlMessage::status(format!("start ignored: {e}"))];
        }
        if let Some(previous) = self.active_test {
            tracing::warn!(%previous, "start while a test is running; stopping it first");
            self.stop_test(previous);
        }

        let mut out = Vec::new();
        let dir = self.session.test_dir(test);
        self.recorder.configure(&dir, DEFAULT_TEMPLATE);
        match self.recorder.start() {
            Ok(()) => tracing::info!(%test, dir = %dir.display(), "recording started"),
            Err(e) => {
                tracing::warn!(%test, kind = %e.kind(), "continuing without recording: {e}");
                out.push(ControlMessage::status(format!("recorder not recording: {e}")));
            }
        }
        if let Some(eye) = self.eye.as_mut().filter(|eye| eye.is_connected()) {
            if let Err(e) = eye.start_recording() {
                tracing::warn!(kind = %e.kind(), "eye-tracker not recording: {e}");
            }
        }
        if let Some(force) = &self.force {
            force.gate().disable();
        }
        if test.uses_tactile() {
            self.start_sequence(test, sequence.unwrap_or_default());
        }

        self.active_test = Some(test);
        out.push(ControlMessage::status(format!("test started: {test}")));
        out
    }

    fn start_sequence(&mut self, test: TestCondition, names: Vec<String>) {
        let Some(turntable) = self.turntable.clone() else {
            tracing::warn!(%test, "tactile test without a turntable");
            return;
        };
        if names.is_empty() {
            tracing::warn!(%test, "start carried no sequence; turntable idle");
            return;
        }
        let bays: Vec<u8> = names.iter().map(|n| self.bays.bay_for(n)).collect();
        tracing::info!(%test, ?bays, "starting bay sequence");
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (ev_tx, ev_rx) = mpsc::channel();
        let poll = turntable.config().poll;
        let runner = BaySequence::new(turntable, bays, true, self.turntable_dwell, HighPrecisionTimer::new());
        match runner.spawn(cmd_rx, ev_tx, poll) {
            Ok(_) => {
                self.sequence = Some(ActiveSequence {
                    commands: cmd_tx,
                    events: ev_rx,
                })
            }
            Err(e) => tracing::error!("cannot start bay sequence thread: {e}"),
        }
    }

    /// Pausing closes the touch gate and parks the bay sequence; resuming
    /// lets the sequence carry on. The client reopens the gate itself.
    fn hold(&mut self, name: &str, paused: bool) -> Vec<ControlMessage> {
        let verb = if paused { "pause" } else { "resume" };
        let test = match name.parse::<TestCondition>() {
            Ok(test) if self.active_test == Some(test) => test,
            Ok(test) => {
                tracing::warn!(%test, "{verb} for a test that is not running");
                return vec![ControlMessage::status(format!("{verb} ignored: {test} is not running"))];
            }
            Err(e) => {
                tracing::warn!("{verb} ignored: {e}");
                return vec![ControlMessage::status(format!("{verb} ignored: {e}"))];
            }
        };
        if paused {
            if let Some(force) = &self.force {
                force.gate().disable();
            }
            self.command_sequence(SequenceCommand::Pause);
            tracing::info!(%test, "test paused; devices held");
            vec![ControlMessage::status(format!("test paused: {test}"))]
        } else {
            self.command_sequence(SequenceCommand::Resume);
            tracing::info!(%test, "test resumed");
            vec![ControlMessage::status(format!("test resumed: {test}"))]
        }
    }

    fn command_sequence(&self, command: SequenceCommand) {
        if let Some(seq) = &self.sequence {
            if seq.commands.send(command).is_err() {
                tracing::debug!("bay sequence already finished");
            }
        }
    }

    fn stop_test(&mut self, test: TestCondition) -> Vec<ControlMessage> {
        self.command_sequence(SequenceCommand::Stop);
        if let Some(force) = &self.force {
            force.gate().disable();
        }
        if let Some(eye) = self.eye.as_mut().filter(|eye| eye.state() == EyeState::Recording) {
            if let Err(e) = eye.stop_recording() {
                tracing::warn!("eye-tracker did not stop: {e}");
            }
        }
        if let Err(e) = self.recorder.stop() {
            tracing::error!(kind = %e.kind(), "recorder did not stop: {e}");
        }
        self.active_test = None;
        tracing::info!(%test, "test stopped");
        vec![ControlMessage::status(format!("test stopped: {test}"))]
    }

    fn publish_label(&mut self, label: &str) {
        match self.labels.publish(label) {
            Ok(marker) => tracing::info!(label = %marker.label, ts = marker.timestamp, "marker"),
            Err(e) => {
                tracing::error!(%label, "marker not published: {e}");
                return;
            }
        }
        if let Some(eye) = self.eye.as_mut().filter(|eye| eye.state() == EyeState::Recording) {
            if let Err(e) = eye.send_marker(label) {
                tracing::warn!(%label, "eye-tracker marker failed: {e}");
            }
        }
    }
}
