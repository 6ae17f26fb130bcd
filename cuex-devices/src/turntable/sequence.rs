use super::{MotorError, Turntable};
use cuex_timing::Timer;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Where a bay sequence is. Each variant names the action performed on the
/// next [`BaySequence::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceState {
    Idle,
    Moving(usize),
    /// Tactile mode: arrived, waiting for an `Open` command.
    AwaitingOpen(usize),
    DoorsOpen(usize),
    Dwell(usize),
    DoorsClosed(usize),
    Done,
    Paused(Box<SequenceState>),
    Stopped,
}

impl SequenceState {
    pub fn is_finished(&self) -> bool {
        matches!(self, SequenceState::Done | SequenceState::Stopped)
    }

    /// States that only change on a command or a timer.
    fn is_waiting(&self) -> bool {
        matches!(
            self,
            SequenceState::AwaitingOpen(_) | SequenceState::Dwell(_) | SequenceState::Paused(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCommand {
    Pause,
    Resume,
    Stop,
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceEvent {
    Arrived { index: usize, bay: u8 },
    /// Tactile mode: the object is in place behind closed doors.
    Ready { index: usize, bay: u8 },
    DoorsOpened(usize),
    DoorsClosed(usize),
    Fault(String),
    Done,
    Stopped,
}

/// Visits a list of bays: move, open, dwell, close, next.
pub struct BaySequence<T: Timer<Timestamp = u64>> {
    turntable: Arc<Turntable>,
    bays: Vec<u8>,
    tactile: bool,
    dwell: Duration,
    timer: T,
    state: SequenceState,
    dwell_started: Option<u64>,
}

impl<T: Timer<Timestamp = u64> + 'static> BaySequence<T> {
    pub fn new(turntable: Arc<Turntable>, bays: Vec<u8>, tactile: bool, dwell: Duration, timer: T) -> Self {
        Self {
            turntable,
            bays,
            tactile,
            dwell,
            timer,
            state: SequenceState::Idle,
            dwell_started: None,
        }
    }

    pub fn state(&self) -> &SequenceState {
        &self.state
    }

    fn fault(&mut self, err: MotorError) -> Vec<SequenceEvent> {
        tracing::error!("turntable sequence paused: {err}");
        let current = std::mem::replace(&mut self.state, SequenceState::Stopped);
        self.state = SequenceState::Paused(Box::new(current));
        vec![SequenceEvent::Fault(err.to_string())]
    }

    /// Performs the action of the current state and advances.
    pub fn step(&mut self) -> Vec<SequenceEvent> {
        match self.state.clone() {
            SequenceState::Idle => {
                if self.bays.is_empty() {
                    self.state = SequenceState::Done;
                    return vec![SequenceEvent::Done];
                }
                self.state = SequenceState::Moving(0);
                Vec::new()
            }
            SequenceState::Moving(i) => {
                let bay = self.bays[i];
                if let Err(e) = self.turntable.move_to_bay(bay) {
                    return self.fault(e);
                }
                if self.tactile {
                    self.state = SequenceState::AwaitingOpen(i);
                    vec![SequenceEvent::Arrived { index: i, bay }, SequenceEvent::Ready { index: i, bay }]
                } else {
                    self.state = SequenceState::DoorsOpen(i);
                    vec![SequenceEvent::Arrived { index: i, bay }]
                }
            }
            SequenceState::DoorsOpen(i) => {
                if let Err(e) = self.turntable.open_doors() {
                    return self.fault(e);
                }
                self.state = SequenceState::Dwell(i);
                self.dwell_started = Some(self.timer.now());
                vec![SequenceEvent::DoorsOpened(i)]
            }
            SequenceState::Dwell(i) => {
                let started = *self.dwell_started.get_or_insert_with(|| self.timer.now());
                if self.timer.elapsed(started) >= self.dwell {
                    self.dwell_started = None;
                    self.state = SequenceState::DoorsClosed(i);
                }
                Vec::new()
            }
            SequenceState::DoorsClosed(i) => {
                if let Err(e) = self.turntable.close_doors() {
                    return self.fault(e);
                }
                let mut events = vec![SequenceEvent::DoorsClosed(i)];
                if i + 1 < self.bays.len() {
                    self.state = SequenceState::Moving(i + 1);
                } else {
                    self.state = SequenceState::Done;
                    tracing::info!(bays = self.bays.len(), "turntable sequence done");
                    events.push(SequenceEvent::Done);
                }
                events
            }
            SequenceState::AwaitingOpen(_)
            | SequenceState::Done
            | SequenceState::Paused(_)
            | SequenceState::Stopped => Vec::new(),
        }
    }

    pub fn handle(&mut self, command: SequenceCommand) -> Vec<SequenceEvent> {
        match command {
            SequenceCommand::Pause => {
                if !self.state.is_finished() && !matches!(self.state, SequenceState::Paused(_)) {
                    let current = std::mem::replace(&mut self.state, SequenceState::Idle);
                    tracing::info!(state = ?current, "turntable sequence paused");
                    self.state = SequenceState::Paused(Box::new(current));
                }
                Vec::new()
            }
            SequenceCommand::Resume => {
                if let SequenceState::Paused(inner) = &self.state {
                    let inner = (**inner).clone();
                    tracing::info!(state = ?inner, "turntable sequence resumed");
                    // The preserved sub-state starts over.
                    self.dwell_started = None;
                    self.state = inner;
                }
                Vec::new()
            }
            SequenceCommand::Stop => {
                if self.state.is_finished() {
                    return Vec::new();
                }
                if let Err(e) = self.turntable.close_doors() {
                    tracing::error!("closing doors on stop failed: {e}");
                }
                self.state = SequenceState::Stopped;
                tracing::info!("turntable sequence stopped");
                vec![SequenceEvent::Stopped]
            }
            SequenceCommand::Open => {
                if let SequenceState::AwaitingOpen(i) = self.state {
                    self.state = SequenceState::DoorsOpen(i);
                } else {
                    tracing::debug!(state = ?self.state, "open ignored");
                }
                Vec::new()
            }
        }
    }

    /// Runs the sequence on its own thread. Commands are applied between
    /// steps, so a motion in flight always completes first.
    pub fn spawn(
        mut self,
        commands: Receiver<SequenceCommand>,
        events: Sender<SequenceEvent>,
        poll: Duration,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("turntable-sequence".into())
            .spawn(move || {
                let send = |evs: Vec<SequenceEvent>| evs.into_iter().all(|e| events.send(e).is_ok());
                loop {
                    for cmd in commands.try_iter().collect::<Vec<_>>() {
                        if !send(self.handle(cmd)) {
                            return;
                        }
                    }
                    if self.state.is_finished() {
                        return;
                    }
                    if self.state.is_waiting() {
                        match commands.recv_timeout(poll) {
                            Ok(cmd) => {
                                if !send(self.handle(cmd)) {
                                    return;
                                }
                            }
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => {
                                self.handle(SequenceCommand::Stop);
                                return;
                            }
                        }
                    }
                    if !send(self.step()) {
                        return;
                    }
                }
            })
    }
}
