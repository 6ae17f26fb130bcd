mod countdown;
mod timer;

pub use countdown::Countdown;
pub use timer::{CalibrationStats, HighPrecisionTimer, ManualTimer, Timer};
