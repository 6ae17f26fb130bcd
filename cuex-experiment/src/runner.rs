use crate::behavior::write_behavior_log;
use crate::engine::{Effect, EngineEvent, TrialEngine};
use cuex_core::{StroopResponse, TestCondition};
use cuex_devices::MarkerSink;
use cuex_render::Presenter;
use cuex_timing::Timer;
use rand::Rng;
use std::path::PathBuf;

/// Device-side actions a test needs, implemented by whichever process owns
/// the recorder and the touch sensor.
pub trait SessionHooks {
    fn start_recording(&mut self, test: TestCondition) -> anyhow::Result<()>;
    fn stop_recording(&mut self, test: TestCondition) -> anyhow::Result<()>;
    fn set_touch_gate(&mut self, enabled: bool) -> anyhow::Result<()>;
    /// Holds the test's devices while the operator or a fault has paused it.
    fn pause_devices(&mut self, _test: TestCondition) -> anyhow::Result<()> {
        Ok(())
    }
    fn resume_devices(&mut self, _test: TestCondition) -> anyhow::Result<()> {
        Ok(())
    }
    fn record_response(&mut self, _response: &StroopResponse) {}
    fn fault(&mut self, _message: &str) {}
}

/// Hooks for a run with no devices attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl SessionHooks for NoHooks {
    fn start_recording(&mut self, _test: TestCondition) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop_recording(&mut self, _test: TestCondition) -> anyhow::Result<()> {
        Ok(())
    }

    fn set_touch_gate(&mut self, _enabled: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Applies engine effects to a presenter, a marker sink and the session
/// hooks, strictly in order.
pub struct TrialRunner<T, R, P, M, H>
where
    T: Timer<Timestamp = u64>,
    R: Rng,
    P: Presenter,
    M: MarkerSink,
    H: SessionHooks,
{
    engine: TrialEngine<T, R>,
    presenter: P,
    markers: M,
    hooks: H,
    log_dir: Option<PathBuf>,
}

impl<T, R, P, M, H> TrialRunner<T, R, P, M, H>
where
    T: Timer<Timestamp = u64>,
    R: Rng,
    P: Presenter,
    M: MarkerSink,
    H: SessionHooks,
{
    pub fn new(engine: TrialEngine<T, R>, presenter: P, markers: M, hooks: H) -> Self {
        Self {
            engine,
            presenter,
            markers,
            hooks,
            log_dir: None,
        }
    }

    /// Directory receiving `data.csv` when a Stroop test ends.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn set_log_dir(&mut self, dir: Option<PathBuf>) {
        self.log_dir = dir;
    }

    pub fn engine(&self) -> &TrialEngine<T, R> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TrialEngine<T, R> {
        &mut self.engine
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Hands the presenter back so the next test can reuse its surface.
    pub fn into_presenter(self) -> P {
        self.presenter
    }

    /// Feeds one event to the engine and applies what it asks for.
    ///
    /// If a display effect fails, the failed effect and the rest of the batch
    /// go back to the engine, which pauses and replays them on Resume.
    /// Returns the effects that were applied.
    pub fn dispatch(&mut self, event: EngineEvent) -> Vec<Effect> {
        let effects = self.engine.tick(event);
        let mut applied = Vec::with_capacity(effects.len());
        let mut pending = effects.into_iter();
        while let Some(effect) = pending.next() {
            if let Err(err) = self.apply(&effect) {
                tracing::error!(error = %err, ?effect, "display failed; pausing test");
                let unapplied: Vec<Effect> = std::iter::once(effect).chain(pending).collect();
                for follow_up in self.engine.display_failed(err.to_string(), unapplied) {
                    if let Err(err) = self.apply(&follow_up) {
                        tracing::error!(error = %err, "effect failed while pausing");
                    }
                    applied.push(follow_up);
                }
                return applied;
            }
            applied.push(effect);
        }
        applied
    }

    fn apply(&mut self, effect: &Effect) -> anyhow::Result<()> {
        let test = self.engine.config().test;
        match effect {
            Effect::ShowInstruction(text) => self.presenter.show_instruction(text)?,
            Effect::ShowCrosshair(duration) => self.presenter.show_crosshair(*duration)?,
            Effect::ShowImage(element) => self.presenter.show_image(element)?,
            Effect::ShowRatingPrompt => self.presenter.show_rating_prompt()?,
            Effect::ShowTimer(ms) => self.presenter.tick_timer(*ms)?,
            Effect::Clear => self.presenter.clear()?,
            Effect::Publish(label) => match self.markers.publish(label) {
                Ok(marker) => tracing::debug!(label = %marker.label, ts = marker.timestamp, "marker"),
                Err(err) => tracing::error!(%label, error = %err, "marker not published"),
            },
            Effect::StartRecording => {
                if let Err(err) = self.hooks.start_recording(test) {
                    tracing::warn!(%test, error = %err, "continuing without recording");
                }
            }
            Effect::StopRecording => {
                if let Err(err) = self.hooks.stop_recording(test) {
                    tracing::warn!(%test, error = %err, "recorder did not stop cleanly");
                }
            }
            Effect::SetTouchGate(enabled) => {
                if let Err(err) = self.hooks.set_touch_gate(*enabled) {
                    tracing::warn!(enabled, error = %err, "touch gate not updated");
                }
            }
            Effect::PauseDevices => {
                if let Err(err) = self.hooks.pause_devices(test) {
                    tracing::warn!(%test, error = %err, "devices not paused");
                }
            }
            Effect::ResumeDevices => {
                if let Err(err) = self.hooks.resume_devices(test) {
                    tracing::warn!(%test, error = %err, "devices not resumed");
                }
            }
            Effect::RecordResponse(response) => self.hooks.record_response(response),
            Effect::WriteBehaviorLog(responses) => match &self.log_dir {
                Some(dir) => match write_behavior_log(dir, responses) {
                    Ok(path) => tracing::info!(path = %path.display(), rows = responses.len(), "behaviour log written"),
                    Err(err) => tracing::error!(error = %err, "behaviour log not written"),
                },
                None => tracing::warn!(rows = responses.len(), "no output directory; behaviour log skipped"),
            },
            Effect::Fault(message) => self.hooks.fault(message),
        }
        Ok(())
    }
}
