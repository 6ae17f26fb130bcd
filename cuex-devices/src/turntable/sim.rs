use super::{MotorError, MotorResult, MotorSettings, StepController};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct SimState {
    position: i64,
    energized: bool,
    stalled: bool,
    calls: Vec<String>,
}

/// Controller that reaches every target immediately. Clones share state,
/// so a test can keep one clone and hand the other to a [`super::Turntable`].
#[derive(Debug, Clone, Default)]
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedController {
    fn state(&self) -> MotorResult<MutexGuard<'_, SimState>> {
        self.state
            .lock()
            .map_err(|_| MotorError::fault("simulated controller poisoned"))
    }

    fn record(&self, call: String) -> MotorResult<MutexGuard<'_, SimState>> {
        let mut state = self.state()?;
        state.calls.push(call);
        Ok(state)
    }

    /// A stalled controller accepts targets but never moves.
    pub fn stall(&self, stalled: bool) {
        if let Ok(mut s) = self.state.lock() {
            s.stalled = stalled;
        }
    }

    pub fn position_now(&self) -> i64 {
        self.state.lock().map(|s| s.position).unwrap_or_default()
    }

    pub fn is_energized(&self) -> bool {
        self.state.lock().map(|s| s.energized).unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut s) = self.state.lock() {
            s.calls.clear();
        }
    }
}

impl StepController for SimulatedController {
    fn set_target(&mut self, position: i64) -> MotorResult<()> {
        let mut s = self.record(format!("position {position}"))?;
        if !s.stalled {
            s.position = position;
        }
        Ok(())
    }

    fn position(&mut self) -> MotorResult<i64> {
        Ok(self.record("position".into())?.position)
    }

    fn energize(&mut self) -> MotorResult<()> {
        self.record("energize".into())?.energized = true;
        Ok(())
    }

    fn deenergize(&mut self) -> MotorResult<()> {
        self.record("deenergize".into())?.energized = false;
        Ok(())
    }

    fn exit_safe_start(&mut self) -> MotorResult<()> {
        self.record("exit-safe-start".into())?;
        Ok(())
    }

    fn halt_and_set_position(&mut self, position: i64) -> MotorResult<()> {
        self.record(format!("halt-and-set-position {position}"))?.position = position;
        Ok(())
    }

    fn configure(&mut self, settings: &MotorSettings) -> MotorResult<()> {
        self.record(format!("configure {settings:?}"))?;
        Ok(())
    }
}
