//! Turntable driver: a 16-bay carousel and a pair of viewing doors, each
//! on its own stepper controller.

mod sequence;
mod sim;
mod tic;

pub use sequence::{BaySequence, SequenceCommand, SequenceEvent, SequenceState};
pub use sim::SimulatedController;
pub use tic::{parse_status, TicCmd};

use cuex_core::{Classify, ErrorKind};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const BAYS: i64 = 16;

#[derive(Debug, Error)]
pub enum MotorError {
    #[error("motor fault: {0}")]
    MotorFault(String),
}

impl MotorError {
    pub fn fault(msg: impl Into<String>) -> Self {
        MotorError::MotorFault(msg.into())
    }
}

impl Classify for MotorError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::DeviceFault
    }
}

pub type MotorResult<T> = Result<T, MotorError>;

/// Driver settings applied once at start-up. `None` leaves the
/// controller's stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MotorSettings {
    pub current_ma: Option<u32>,
    pub step_mode: Option<u32>,
    pub max_speed: Option<u32>,
    pub max_accel: Option<u32>,
}

/// One stepper controller.
pub trait StepController: Send {
    fn set_target(&mut self, position: i64) -> MotorResult<()>;
    fn position(&mut self) -> MotorResult<i64>;
    fn energize(&mut self) -> MotorResult<()>;
    fn deenergize(&mut self) -> MotorResult<()>;
    fn exit_safe_start(&mut self) -> MotorResult<()>;
    fn halt_and_set_position(&mut self, position: i64) -> MotorResult<()>;
    fn configure(&mut self, settings: &MotorSettings) -> MotorResult<()>;
}

#[derive(Debug, Clone)]
pub struct TurntableConfig {
    pub steps_per_rev: i64,
    pub door_open_steps: i64,
    pub poll: Duration,
    pub timeout: Duration,
    pub carousel: MotorSettings,
    pub door: MotorSettings,
}

impl Default for TurntableConfig {
    fn default() -> Self {
        Self {
            steps_per_rev: 3200,
            door_open_steps: 400,
            poll: Duration::from_millis(20),
            timeout: Duration::from_secs(15),
            carousel: MotorSettings::default(),
            door: MotorSettings::default(),
        }
    }
}

/// Picks the candidate among `delta`, `delta + steps_per_rev` and
/// `delta - steps_per_rev` with the smallest magnitude. Ties go to the
/// positive candidate.
pub fn shortest_delta(delta: i64, steps_per_rev: i64) -> i64 {
    [delta, delta + steps_per_rev, delta - steps_per_rev]
        .into_iter()
        .min_by_key(|c| (c.abs(), *c < 0))
        .unwrap_or(delta)
}

/// The two actuators behind one lock each, so only one motion per
/// actuator runs at a time.
pub struct Turntable {
    carousel: Mutex<Box<dyn StepController>>,
    doors: Mutex<Box<dyn StepController>>,
    config: TurntableConfig,
}

impl Turntable {
    pub fn new(
        carousel: Box<dyn StepController>,
        doors: Box<dyn StepController>,
        config: TurntableConfig,
    ) -> Self {
        Self {
            carousel: Mutex::new(carousel),
            doors: Mutex::new(doors),
            config,
        }
    }

    pub fn config(&self) -> &TurntableConfig {
        &self.config
    }

    fn lock<'a>(
        m: &'a Mutex<Box<dyn StepController>>,
    ) -> MotorResult<std::sync::MutexGuard<'a, Box<dyn StepController>>> {
        m.lock().map_err(|_| MotorError::fault("controller lock poisoned"))
    }

    /// Applies settings and zeroes both controllers at their current
    /// position.
    pub fn initialize(&self) -> MotorResult<()> {
        for (name, ctrl, settings) in [
            ("carousel", &self.carousel, &self.config.carousel),
            ("doors", &self.doors, &self.config.door),
        ] {
            let mut ctrl = Self::lock(ctrl)?;
            ctrl.configure(settings)?;
            ctrl.exit_safe_start()?;
            ctrl.halt_and_set_position(0)?;
            tracing::info!(actuator = name, "stepper initialized");
        }
        Ok(())
    }

    pub fn target_step(&self, bay: u8) -> i64 {
        i64::from(bay) * self.config.steps_per_rev / BAYS
    }

    /// Rotates the carousel to `bay` by the shortest path and returns the
    /// signed delta that was driven.
    pub fn move_to_bay(&self, bay: u8) -> MotorResult<i64> {
        if i64::from(bay) >= BAYS {
            return Err(MotorError::fault(format!("bay {bay} out of range")));
        }
        let spr = self.config.steps_per_rev;
        let mut ctrl = Self::lock(&self.carousel)?;
        let current = ctrl.position()?;
        let delta = shortest_delta(self.target_step(bay) - current.rem_euclid(spr), spr);
        let absolute = current + delta;
        tracing::info!(bay, current, delta, "moving carousel");
        self.drive(&mut **ctrl, absolute)?;
        Ok(delta)
    }

    pub fn open_doors(&self) -> MotorResult<()> {
        let mut ctrl = Self::lock(&self.doors)?;
        tracing::info!("opening doors");
        self.drive(&mut **ctrl, self.config.door_open_steps)
    }

    pub fn close_doors(&self) -> MotorResult<()> {
        let mut ctrl = Self::lock(&self.doors)?;
        tracing::info!("closing doors");
        self.drive(&mut **ctrl, 0)
    }

    /// Energize, move, wait for arrival, de-energize. The coil is released
    /// even when the motion fails.
    fn drive(&self, ctrl: &mut dyn StepController, target: i64) -> MotorResult<()> {
        ctrl.energize()?;
        let result = self.motion(ctrl, target);
        let released = ctrl.deenergize();
        result.and(released)
    }

    fn motion(&self, ctrl: &mut dyn StepController, target: i64) -> MotorResult<()> {
        ctrl.exit_safe_start()?;
        ctrl.set_target(target)?;
        self.wait_for(ctrl, target)
    }

    fn wait_for(&self, ctrl: &mut dyn StepController, target: i64) -> MotorResult<()> {
        let started = Instant::now();
        loop {
            let position = ctrl.position()?;
            if position == target {
                return Ok(());
            }
            if started.elapsed() >= self.config.timeout {
                tracing::error!(target, position, "motion timed out");
                return Err(MotorError::fault(format!(
                    "stuck at {position}, expected {target}"
                )));
            }
            std::thread::sleep(self.config.poll);
        }
    }
}
