use anyhow::Result;
use cuex_core::Element;
use std::time::Duration;

/// One subject-facing display surface.
///
/// `show_image` returns once the element is painted into the frame, so the
/// caller can publish the onset marker right after it. `show_crosshair`
/// returns immediately; `elapsed` reports whether its duration has passed.
/// A presenter knows nothing about markers.
pub trait Presenter {
    fn show_instruction(&mut self, text: &str) -> Result<()>;
    fn show_crosshair(&mut self, duration: Duration) -> Result<()>;
    fn show_image(&mut self, element: &Element) -> Result<()>;
    fn show_rating_prompt(&mut self) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
    /// Updates the timer readout with the time left, in milliseconds.
    fn tick_timer(&mut self, remaining_ms: u64) -> Result<()>;
    fn elapsed(&self) -> bool;
}

pub const RATING_PROMPT: &str = "How strong is your craving for alcohol right now?\n\n\
1 = no craving at all, 9 = extremely strong craving\n\n\
Tell the experimenter your rating, then press SPACE to continue.";

/// Whole seconds shown for `remaining_ms`, rounded up so a 3 s countdown
/// reads 3, 2, 1.
pub fn timer_readout(remaining_ms: u64) -> String {
    remaining_ms.div_ceil(1000).to_string()
}
