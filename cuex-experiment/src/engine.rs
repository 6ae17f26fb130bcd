use crate::config::EngineConfig;
use crate::instructions;
use crate::trial::ElementTiming;
use cuex_core::marker::{
    onset_label, response_label, COUNTDOWN, CROSSHAIR_INSTRUCTIONS, CROSSHAIR_PERIOD, MAIN_INSTRUCTIONS, TEST_ENDED,
};
use cuex_core::{Answer, Classify, Element, ErrorKind, Sequence, SequenceError, StroopResponse, TrialState};
use cuex_timing::{Countdown, Timer};
use rand::Rng;
use std::time::Duration;
use thiserror::Error;

/// Inputs to the trial engine. `Tick` is sent once per frame.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Start,
    Tick,
    Space,
    Response(Answer),
    NextPressed,
    Touched,
    Pause,
    Resume,
    Stop,
    DeviceFault(String),
}

/// Side effects requested by one transition, in the order they must be
/// applied. A `Show*` effect always precedes the marker that announces it.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartRecording,
    StopRecording,
    ShowInstruction(String),
    ShowCrosshair(Duration),
    ShowImage(Element),
    ShowRatingPrompt,
    /// Countdown readout, milliseconds left.
    ShowTimer(u64),
    Clear,
    Publish(String),
    SetTouchGate(bool),
    /// Hold the devices of the test where they are (touch gate, turntable).
    PauseDevices,
    ResumeDevices,
    RecordResponse(StroopResponse),
    WriteBehaviorLog(Vec<StroopResponse>),
    Fault(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid sequence: {0}")]
    Sequence(#[from] SequenceError),
    #[error("cannot load a sequence while {0}")]
    Busy(&'static str),
}

impl Classify for EngineError {
    fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Sequence(_) => ErrorKind::AssetError,
            EngineError::Busy(_) => ErrorKind::ProtocolError,
        }
    }
}

/// What Resume has to redo after a frame failed to show.
#[derive(Debug, Clone, PartialEq)]
enum Replay {
    /// The element was never painted; present it again from its start.
    Present,
    /// Effects dropped after the failed one, applied again in order.
    Effects(Vec<Effect>),
}

/// Drives one test run through its fixed state flow.
///
/// The engine never touches a device or the screen itself; every
/// transition returns the [`Effect`]s a runner has to apply.
pub struct TrialEngine<T, R>
where
    T: Timer<Timestamp = u64>,
    R: Rng,
{
    config: EngineConfig,
    sequence: Sequence,
    timer: T,
    rng: R,
    state: TrialState,
    index: usize,
    deadline: Option<Countdown>,
    paused_time: Option<Duration>,
    paused_index: Option<usize>,
    started_at: u64,
    readout_s: Option<u64>,
    end_published: bool,
    replay: Option<Replay>,
    responses: Vec<StroopResponse>,
    timings: Vec<ElementTiming>,
}

impl<T, R> TrialEngine<T, R>
where
    T: Timer<Timestamp = u64>,
    R: Rng,
{
    pub fn new(config: EngineConfig, sequence: Sequence, timer: T, rng: R) -> Result<Self, EngineError> {
        sequence.validate(config.test.modality())?;
        Ok(Self {
            config,
            sequence,
            timer,
            rng,
            state: TrialState::Idle,
            index: 0,
            deadline: None,
            paused_time: None,
            paused_index: None,
            started_at: 0,
            readout_s: None,
            end_published: false,
            replay: None,
            responses: Vec::new(),
            timings: Vec::new(),
        })
    }

    /// Replaces the sequence before the next `Start`.
    pub fn load(&mut self, sequence: Sequence) -> Result<(), EngineError> {
        if !(self.state == TrialState::Idle || self.state.is_terminal()) {
            return Err(EngineError::Busy(self.state.name()));
        }
        sequence.validate(self.config.test.modality())?;
        self.sequence = sequence;
        self.state = TrialState::Idle;
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn state(&self) -> &TrialState {
        &self.state
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current_element(&self) -> Option<&Element> {
        self.sequence.get(self.index)
    }

    pub fn responses(&self) -> &[StroopResponse] {
        &self.responses
    }

    pub fn timings(&self) -> &[ElementTiming] {
        &self.timings
    }

    /// Time already spent in the timed state that was paused.
    pub fn paused_time(&self) -> Option<Duration> {
        self.paused_time
    }

    pub fn paused_index(&self) -> Option<usize> {
        self.paused_index
    }

    pub fn is_running(&self) -> bool {
        self.is_active() || self.state.is_paused()
    }

    fn is_active(&self) -> bool {
        !(self.state == TrialState::Idle || self.state.is_terminal() || self.state.is_paused())
    }

    pub fn tick(&mut self, event: EngineEvent) -> Vec<Effect> {
        let mut fx = Vec::new();
        let state = self.state.clone();
        match (state, event) {
            (TrialState::Idle | TrialState::Ended | TrialState::Stopped, EngineEvent::Start) => self.begin(&mut fx),
            (_, EngineEvent::Stop) if self.is_running() => self.stop(&mut fx),
            (_, EngineEvent::Pause) if self.is_active() => self.pause(&mut fx),
            (TrialState::Paused(inner), EngineEvent::Resume) => self.resume(*inner, &mut fx),
            (_, EngineEvent::DeviceFault(msg)) => {
                tracing::error!(%msg, state = self.state.name(), "device fault during test");
                fx.push(Effect::Fault(msg));
                if self.is_active() {
                    self.pause(&mut fx);
                }
            }

            (TrialState::PreInstructions, EngineEvent::Tick) if self.deadline_done() => self.enter_baseline(&mut fx),
            (TrialState::CrosshairBaseline, EngineEvent::Tick) if self.deadline_done() => self.enter_main(&mut fx),
            (TrialState::MainInstructions, EngineEvent::Space) => self.enter_countdown(&mut fx),
            (TrialState::Countdown, EngineEvent::Tick) => self.countdown_tick(&mut fx),
            (TrialState::Presenting, EngineEvent::Tick) if self.deadline_done() => self.finish_image(&mut fx),
            (TrialState::Presenting, EngineEvent::Space) if self.deadline.is_none() => self.enter_post(&mut fx),
            (TrialState::WaitingForResponse, EngineEvent::Response(answer)) => self.respond(answer, &mut fx),
            (TrialState::InterStimulusCrosshair, EngineEvent::Tick) if self.deadline_done() => self.advance(&mut fx),
            (TrialState::WaitingForNextPress, EngineEvent::NextPressed) => self.await_touch(false, &mut fx),
            (TrialState::WaitingForTouch, EngineEvent::Touched) => {
                fx.push(Effect::SetTouchGate(false));
                self.present(self.index, &mut fx);
            }
            (TrialState::PostInstructions, EngineEvent::Tick) if self.deadline_done() => {
                self.finish(TrialState::Ended, &mut fx)
            }

            (_, EngineEvent::Tick) => {}
            (state, event) => tracing::trace!(state = state.name(), ?event, "event ignored"),
        }
        fx
    }

    /// Reports that `unapplied[0]`, a display effect, failed. The engine
    /// pauses; Resume shows the lost frame and publishes its marker once.
    pub fn display_failed(&mut self, message: String, unapplied: Vec<Effect>) -> Vec<Effect> {
        tracing::error!(%message, state = self.state.name(), dropped = unapplied.len(), "frame not shown");
        let mut fx = vec![Effect::Fault(message)];
        if !self.is_active() {
            return fx;
        }
        let end_label = Effect::Publish(self.config.test.end_label().to_string());
        if unapplied.contains(&end_label) {
            self.end_published = false;
        }
        self.replay = Some(if self.state == TrialState::Presenting {
            Replay::Present
        } else {
            Replay::Effects(unapplied)
        });
        self.pause(&mut fx);
        fx
    }

    fn enter(&mut self, next: TrialState) {
        tracing::debug!(from = self.state.name(), to = next.name(), index = self.index, "trial state");
        self.state = next;
    }

    fn set_deadline(&mut self, duration: Duration) {
        self.deadline = Some(Countdown::start(self.timer.now(), duration));
    }

    fn deadline_done(&self) -> bool {
        self.deadline.as_ref().is_some_and(|c| c.is_done(self.timer.now()))
    }

    fn begin(&mut self, fx: &mut Vec<Effect>) {
        self.index = 0;
        self.responses.clear();
        self.timings.clear();
        self.end_published = false;
        self.replay = None;
        self.paused_time = None;
        self.paused_index = None;
        self.readout_s = None;
        self.started_at = self.timer.now();
        tracing::info!(test = %self.config.test, elements = self.sequence.len(), "test started");

        fx.push(Effect::StartRecording);
        fx.push(Effect::ShowInstruction(instructions::crosshair_instructions().to_string()));
        fx.push(Effect::Publish(CROSSHAIR_INSTRUCTIONS.to_string()));
        self.set_deadline(self.config.pre_instructions);
        self.enter(TrialState::PreInstructions);
    }

    fn enter_baseline(&mut self, fx: &mut Vec<Effect>) {
        fx.push(Effect::ShowCrosshair(self.config.baseline));
        fx.push(Effect::Publish(CROSSHAIR_PERIOD.to_string()));
        self.set_deadline(self.config.baseline);
        self.enter(TrialState::CrosshairBaseline);
    }

    fn enter_main(&mut self, fx: &mut Vec<Effect>) {
        fx.push(Effect::ShowInstruction(instructions::main_instructions(self.config.test)));
        fx.push(Effect::Publish(MAIN_INSTRUCTIONS.to_string()));
        self.deadline = None;
        self.enter(TrialState::MainInstructions);
    }

    fn enter_countdown(&mut self, fx: &mut Vec<Effect>) {
        let total = self.config.countdown;
        fx.push(Effect::Clear);
        fx.push(Effect::ShowTimer(total.as_millis() as u64));
        fx.push(Effect::Publish(COUNTDOWN.to_string()));
        self.readout_s = Some((total.as_millis() as u64).div_ceil(1000));
        self.set_deadline(total);
        self.enter(TrialState::Countdown);
    }

    fn countdown_tick(&mut self, fx: &mut Vec<Effect>) {
        let now = self.timer.now();
        let Some(remaining) = self.deadline.as_ref().map(|c| c.remaining(now)) else {
            return;
        };
        if remaining.is_zero() {
            self.readout_s = None;
            self.start_elements(fx);
            return;
        }
        let ms = remaining.as_millis() as u64;
        let secs = ms.div_ceil(1000);
        if self.readout_s != Some(secs) {
            self.readout_s = Some(secs);
            fx.push(Effect::ShowTimer(ms));
        }
    }

    fn start_elements(&mut self, fx: &mut Vec<Effect>) {
        self.index = 0;
        if self.wants_touch(0) {
            self.await_touch(true, fx);
        } else {
            self.present(0, fx);
        }
    }

    fn wants_touch(&self, index: usize) -> bool {
        self.config.test.uses_tactile() && self.sequence.get(index).is_some_and(Element::is_image)
    }

    fn await_touch(&mut self, initial: bool, fx: &mut Vec<Effect>) {
        fx.push(Effect::ShowInstruction(instructions::touch_instructions(initial).to_string()));
        fx.push(Effect::SetTouchGate(true));
        self.deadline = None;
        self.enter(TrialState::WaitingForTouch);
    }

    fn present(&mut self, index: usize, fx: &mut Vec<Effect>) {
        self.index = index;
        match self.sequence.get(index).cloned() {
            None => self.enter_post(fx),
            Some(Element::Image(img)) => {
                let basename = img.basename();
                let now = self.timer.now();
                fx.push(Effect::ShowImage(Element::Image(img)));
                fx.push(Effect::Publish(onset_label(&basename)));
                self.timings.push(ElementTiming::new(index, basename, now));
                self.set_deadline(self.config.image_dwell);
                self.enter(TrialState::Presenting);
            }
            Some(Element::CravingPrompt { .. }) => {
                fx.push(Effect::ShowRatingPrompt);
                self.deadline = None;
                self.enter(TrialState::Presenting);
            }
        }
    }

    fn finish_image(&mut self, fx: &mut Vec<Effect>) {
        if self.config.is_stroop() {
            fx.push(Effect::ShowInstruction(instructions::stroop_prompt().to_string()));
            self.deadline = None;
            self.enter(TrialState::WaitingForResponse);
        } else {
            self.after_element(fx);
        }
    }

    fn respond(&mut self, answer: Answer, fx: &mut Vec<Effect>) {
        let now = self.timer.now();
        let basename = self
            .sequence
            .get(self.index)
            .and_then(Element::as_image)
            .map(|img| img.basename())
            .unwrap_or_default();
        fx.push(Effect::Publish(response_label(&basename, answer)));

        let response = StroopResponse {
            answer,
            elapsed_s: Duration::from_nanos(now.saturating_sub(self.started_at)).as_secs_f64(),
        };
        if let Some(timing) = self.timings.last_mut() {
            let latency = timing.record_response(answer, now);
            tracing::info!(%basename, %answer, latency_ms = latency.as_millis() as u64, "stroop response");
        }
        self.responses.push(response.clone());
        fx.push(Effect::RecordResponse(response));
        self.after_element(fx);
    }

    fn after_element(&mut self, fx: &mut Vec<Effect>) {
        if self.index + 1 >= self.sequence.len() {
            self.enter_post(fx);
            return;
        }
        let ms = self.rng.random_range(self.config.crosshair_range());
        let duration = Duration::from_millis(ms);
        fx.push(Effect::ShowCrosshair(duration));
        self.set_deadline(duration);
        self.enter(TrialState::InterStimulusCrosshair);
    }

    fn advance(&mut self, fx: &mut Vec<Effect>) {
        let next = self.index + 1;
        if self.wants_touch(next) {
            self.index = next;
            self.deadline = None;
            self.enter(TrialState::WaitingForNextPress);
        } else {
            self.present(next, fx);
        }
    }

    fn enter_post(&mut self, fx: &mut Vec<Effect>) {
        fx.push(Effect::ShowInstruction(instructions::post_instructions().to_string()));
        fx.push(Effect::Publish(self.config.test.end_label().to_string()));
        self.end_published = true;
        self.set_deadline(self.config.post_instructions);
        self.enter(TrialState::PostInstructions);
    }

    fn finish(&mut self, terminal: TrialState, fx: &mut Vec<Effect>) {
        fx.push(Effect::Publish(TEST_ENDED.to_string()));
        fx.push(Effect::StopRecording);
        if self.config.is_stroop() {
            fx.push(Effect::WriteBehaviorLog(self.responses.clone()));
        }
        fx.push(Effect::Clear);
        self.deadline = None;
        tracing::info!(test = %self.config.test, responses = self.responses.len(), end = terminal.name(), "test finished");
        self.enter(terminal);
    }

    fn stop(&mut self, fx: &mut Vec<Effect>) {
        let underlying = match &self.state {
            TrialState::Paused(inner) => inner.as_ref().clone(),
            other => other.clone(),
        };
        if underlying == TrialState::WaitingForTouch {
            fx.push(Effect::SetTouchGate(false));
        }
        if !self.end_published {
            fx.push(Effect::Publish(self.config.test.end_label().to_string()));
            self.end_published = true;
        }
        self.replay = None;
        self.finish(TrialState::Stopped, fx);
    }

    fn pause(&mut self, fx: &mut Vec<Effect>) {
        let now = self.timer.now();
        self.paused_index = Some(self.index);
        self.paused_time = self.deadline.as_mut().map(|c| {
            c.pause(now);
            c.elapsed(now)
        });
        if self.state == TrialState::WaitingForTouch {
            fx.push(Effect::SetTouchGate(false));
        }
        fx.push(Effect::PauseDevices);
        tracing::info!(
            state = self.state.name(),
            index = self.index,
            paused_ms = self.paused_time.map(|d| d.as_millis() as u64),
            "test paused"
        );
        let current = std::mem::replace(&mut self.state, TrialState::Idle);
        self.state = TrialState::Paused(Box::new(current));
    }

    fn resume(&mut self, inner: TrialState, fx: &mut Vec<Effect>) {
        fx.push(Effect::ResumeDevices);
        tracing::info!(state = inner.name(), index = self.index, replay = self.replay.is_some(), "test resumed");
        self.paused_time = None;
        self.paused_index = None;
        self.state = inner;

        if self.replay == Some(Replay::Present) {
            self.replay = None;
            if self.timings.last().is_some_and(|t| t.index == self.index) {
                self.timings.pop();
            }
            self.present(self.index, fx);
            return;
        }

        let now = self.timer.now();
        if let Some(c) = self.deadline.as_mut() {
            c.resume(now);
        }
        if self.state == TrialState::WaitingForTouch {
            fx.push(Effect::SetTouchGate(true));
        }
        if let Some(Replay::Effects(dropped)) = self.replay.take() {
            if dropped.contains(&Effect::Publish(self.config.test.end_label().to_string())) {
                self.end_published = true;
            }
            fx.extend(dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuex_core::{ImageStimulus, Origin, TestCondition};
    use cuex_timing::ManualTimer;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn images(n: usize) -> Vec<ImageStimulus> {
        (0..n)
            .map(|i| ImageStimulus::new(format!("/stim/img{i}.png"), Origin::Neutral))
            .collect()
    }

    fn engine(test: TestCondition, n: usize) -> (TrialEngine<ManualTimer, StdRng>, ManualTimer) {
        let timer = ManualTimer::new();
        let seq = Sequence::for_modality(test.modality(), images(n));
        let e = TrialEngine::new(EngineConfig::for_test(test), seq, timer.clone(), StdRng::seed_from_u64(1))
            .unwrap();
        (e, timer)
    }

    fn to_main(e: &mut TrialEngine<ManualTimer, StdRng>, timer: &ManualTimer) {
        e.tick(EngineEvent::Start);
        timer.advance_ms(5000);
        e.tick(EngineEvent::Tick);
        timer.advance_ms(60_000);
        e.tick(EngineEvent::Tick);
        assert_eq!(e.state(), &TrialState::MainInstructions);
    }

    /// Runs a passive test up to the post instructions and returns the
    /// effects that entered them.
    fn to_post(e: &mut TrialEngine<ManualTimer, StdRng>, timer: &ManualTimer) -> Vec<Effect> {
        to_main(e, timer);
        e.tick(EngineEvent::Space);
        for _ in 0..1000 {
            timer.advance_ms(100);
            let on_prompt = e.state() == &TrialState::Presenting && !e.current_element().is_some_and(Element::is_image);
            let fx = e.tick(if on_prompt { EngineEvent::Space } else { EngineEvent::Tick });
            if e.state() == &TrialState::PostInstructions {
                return fx;
            }
        }
        panic!("never reached post instructions: {:?}", e.state());
    }

    #[test]
    fn start_requests_recording_before_any_marker() {
        let (mut e, _) = engine(TestCondition::UnisensoryNeutralVisual, 2);
        let fx = e.tick(EngineEvent::Start);
        assert_eq!(fx[0], Effect::StartRecording);
        assert!(matches!(fx[1], Effect::ShowInstruction(_)));
        assert_eq!(fx[2], Effect::Publish(CROSSHAIR_INSTRUCTIONS.into()));
    }

    #[test]
    fn countdown_readout_changes_once_per_second() {
        let (mut e, timer) = engine(TestCondition::UnisensoryNeutralVisual, 2);
        to_main(&mut e, &timer);
        e.tick(EngineEvent::Space);
        let mut readouts = 0;
        for _ in 0..29 {
            timer.advance_ms(100);
            readouts += e
                .tick(EngineEvent::Tick)
                .iter()
                .filter(|f| matches!(f, Effect::ShowTimer(_)))
                .count();
        }
        assert_eq!(readouts, 2);
        assert_eq!(e.state(), &TrialState::Countdown);
        timer.advance_ms(100);
        let fx = e.tick(EngineEvent::Tick);
        assert!(matches!(fx[0], Effect::ShowImage(_)));
        assert_eq!(fx[1], Effect::Publish("img0 Image".into()));
    }

    #[test]
    fn space_outside_instructions_is_ignored() {
        let (mut e, timer) = engine(TestCondition::UnisensoryNeutralVisual, 1);
        e.tick(EngineEvent::Start);
        assert!(e.tick(EngineEvent::Space).is_empty());
        assert_eq!(e.state(), &TrialState::PreInstructions);
        timer.advance_ms(5000);
        assert!(!e.tick(EngineEvent::Tick).is_empty());
    }

    #[test]
    fn pause_freezes_timed_state() {
        let (mut e, timer) = engine(TestCondition::UnisensoryNeutralVisual, 1);
        e.tick(EngineEvent::Start);
        timer.advance_ms(1500);
        e.tick(EngineEvent::Pause);
        assert!(e.state().is_paused());
        assert_eq!(e.paused_time(), Some(Duration::from_millis(1500)));
        timer.advance_ms(30_000);
        assert!(e.tick(EngineEvent::Tick).is_empty());
        e.tick(EngineEvent::Resume);
        assert_eq!(e.state(), &TrialState::PreInstructions);
        timer.advance_ms(3499);
        e.tick(EngineEvent::Tick);
        assert_eq!(e.state(), &TrialState::PreInstructions);
        timer.advance_ms(1);
        e.tick(EngineEvent::Tick);
        assert_eq!(e.state(), &TrialState::CrosshairBaseline);
    }

    #[test]
    fn device_fault_pauses_and_reports() {
        let (mut e, timer) = engine(TestCondition::UnisensoryNeutralVisual, 1);
        to_main(&mut e, &timer);
        let fx = e.tick(EngineEvent::DeviceFault("turntable stalled".into()));
        assert_eq!(fx, vec![Effect::Fault("turntable stalled".into()), Effect::PauseDevices]);
        assert_eq!(e.state(), &TrialState::Paused(Box::new(TrialState::MainInstructions)));
        assert_eq!(e.paused_time(), None);
    }

    #[test]
    fn stop_while_paused_in_touch_wait_closes_gate() {
        let (mut e, timer) = engine(TestCondition::MultisensoryNeutralTactile, 2);
        to_main(&mut e, &timer);
        e.tick(EngineEvent::Space);
        timer.advance_ms(3000);
        let fx = e.tick(EngineEvent::Tick);
        assert!(fx.contains(&Effect::SetTouchGate(true)));
        assert_eq!(e.tick(EngineEvent::Pause), vec![Effect::SetTouchGate(false), Effect::PauseDevices]);
        let fx = e.tick(EngineEvent::Stop);
        assert_eq!(fx[0], Effect::SetTouchGate(false));
        assert_eq!(fx[1], Effect::Publish("Passive Test Ended".into()));
        assert_eq!(fx[2], Effect::Publish(TEST_ENDED.into()));
        assert_eq!(fx[3], Effect::StopRecording);
        assert_eq!(e.state(), &TrialState::Stopped);
    }

    #[test]
    fn resume_reopens_gate_after_devices() {
        let (mut e, timer) = engine(TestCondition::MultisensoryNeutralTactile, 2);
        to_main(&mut e, &timer);
        e.tick(EngineEvent::Space);
        timer.advance_ms(3000);
        e.tick(EngineEvent::Tick);
        e.tick(EngineEvent::Pause);
        assert_eq!(
            e.tick(EngineEvent::Resume),
            vec![Effect::ResumeDevices, Effect::SetTouchGate(true)]
        );
        assert_eq!(e.state(), &TrialState::WaitingForTouch);
    }

    #[test]
    fn lost_post_instructions_are_replayed_once() {
        let (mut e, timer) = engine(TestCondition::UnisensoryNeutralVisual, 1);
        let fx = to_post(&mut e, &timer);
        assert_eq!(e.state(), &TrialState::PostInstructions);
        let failed = fx.iter().position(|f| matches!(f, Effect::ShowInstruction(_))).unwrap();

        let paused = e.display_failed("no font".into(), fx[failed..].to_vec());
        assert_eq!(paused, vec![Effect::Fault("no font".into()), Effect::PauseDevices]);
        let resumed = e.tick(EngineEvent::Resume);
        assert_eq!(resumed[0], Effect::ResumeDevices);
        assert_eq!(&resumed[1..], &fx[failed..]);

        let stop = e.tick(EngineEvent::Stop);
        assert!(!stop.contains(&Effect::Publish("Passive Test Ended".into())));
    }

    #[test]
    fn stop_after_lost_end_marker_still_publishes_it() {
        let (mut e, timer) = engine(TestCondition::UnisensoryNeutralVisual, 1);
        let fx = to_post(&mut e, &timer);
        let failed = fx.iter().position(|f| matches!(f, Effect::ShowInstruction(_))).unwrap();
        e.display_failed("no font".into(), fx[failed..].to_vec());

        let stop = e.tick(EngineEvent::Stop);
        assert_eq!(stop[0], Effect::Publish("Passive Test Ended".into()));
        assert_eq!(stop[1], Effect::Publish(TEST_ENDED.into()));
    }

    #[test]
    fn load_is_refused_mid_run() {
        let (mut e, _) = engine(TestCondition::StroopNeutralOlfactory, 2);
        e.tick(EngineEvent::Start);
        let err = e.load(Sequence::stroop(images(3))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }

    #[test]
    fn passive_sequence_without_prompt_is_rejected() {
        let timer = ManualTimer::new();
        let err = TrialEngine::new(
            EngineConfig::for_test(TestCondition::UnisensoryAlcoholVisual),
            Sequence::stroop(images(2)),
            timer,
            StdRng::seed_from_u64(0),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::AssetError);
    }
}
