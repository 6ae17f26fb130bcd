//! Subject-facing presentation: the [`Presenter`] seam and a tiny-skia
//! implementation with an operator mirror.

mod blit;
mod presenter;
mod skia;
mod text;

pub use blit::{blit, blit_centered};
pub use presenter::{timer_readout, Presenter, RATING_PROMPT};
pub use skia::{FrameStats, SkiaPresenter};
pub use text::{load_font, render_text_block, render_text_pixmap, wrap_lines};
