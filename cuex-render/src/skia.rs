use crate::blit::{blit, blit_centered};
use crate::presenter::{timer_readout, Presenter, RATING_PROMPT};
use crate::text::{load_font, TextCache};
use anyhow::{anyhow, Context, Result};
use cuex_core::{Element, ImageStimulus};
use cuex_timing::{Countdown, Timer};
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use string_cache::DefaultAtom as Atom;
use tiny_skia::{
    Color, ColorU8, FilterQuality, Paint, Pixmap, PixmapPaint, Rect, Transform,
};

const INSTRUCTION_PX: f32 = 32.0;
const TIMER_PX: f32 = 64.0;
const CROSS_SIZE: u32 = 40;
const CROSS_BAR: f32 = 2.0;

/// Frame counters for the operator panel and benches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u64,
    pub cached_texts: usize,
    pub cached_images: usize,
}

/// Software presenter: composes the image layer, the overlay layer and the
/// timer readout into one pixmap, and fans each finished frame out to the
/// mirror subscribers.
pub struct SkiaPresenter<T: Timer<Timestamp = u64>> {
    width: u32,
    height: u32,
    center: (f32, f32),

    timer: T,
    crosshair: Option<Countdown>,

    overlay: Option<Arc<Pixmap>>,
    image: Option<Arc<Pixmap>>,
    readout: Option<Arc<Pixmap>>,

    text_cache: TextCache,
    image_cache: HashMap<Atom, Arc<Pixmap>>,
    cross: Arc<Pixmap>,

    canvas: Pixmap,
    mirrors: Vec<Sender<Arc<Pixmap>>>,
    frames: u64,
}

impl<T: Timer<Timestamp = u64>> SkiaPresenter<T> {
    pub fn new(width: u32, height: u32, font_path: Option<&Path>, timer: T) -> Result<Self> {
        let font = match font_path {
            Some(path) => Some(
                load_font(path).with_context(|| format!("loading font {}", path.display()))?,
            ),
            None => None,
        };
        let canvas = blank(width, height)?;
        Ok(Self {
            width,
            height,
            center: (width as f32 / 2.0, height as f32 / 2.0),
            timer,
            crosshair: None,
            overlay: None,
            image: None,
            readout: None,
            text_cache: TextCache::new(font),
            image_cache: HashMap::new(),
            cross: Arc::new(fixation_cross()?),
            canvas,
            mirrors: Vec::new(),
            frames: 0,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.width = width;
        self.height = height;
        self.center = (width as f32 / 2.0, height as f32 / 2.0);
        self.canvas = blank(width, height)?;
        // Scaled images depend on the surface size.
        self.image_cache.clear();
        self.image = None;
        self.compose();
        Ok(())
    }

    pub fn frame(&self) -> &Pixmap {
        &self.canvas
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            frames: self.frames,
            cached_texts: self.text_cache.len(),
            cached_images: self.image_cache.len(),
        }
    }

    /// Every composed frame is sent to the returned receiver. The mirror
    /// only consumes; dropping the receiver unsubscribes it.
    pub fn subscribe_mirror(&mut self) -> Receiver<Arc<Pixmap>> {
        let (tx, rx) = mpsc::channel();
        self.mirrors.push(tx);
        rx
    }

    fn text(&mut self, text: &str, size: f32) -> Option<Arc<Pixmap>> {
        let max_width = self.width as f32 * 0.8;
        self.text_cache.get_or_render(text, size, max_width)
    }

    fn load_image(&mut self, stimulus: &ImageStimulus) -> Result<Arc<Pixmap>> {
        let key = Atom::from(stimulus.path.to_string_lossy().as_ref());
        if let Some(pm) = self.image_cache.get(&key) {
            return Ok(Arc::clone(pm));
        }
        let decoded = image::open(&stimulus.path)
            .with_context(|| format!("decoding {}", stimulus.path.display()))?
            .to_rgba8();
        let (w, h) = decoded.dimensions();
        let mut source = Pixmap::new(w, h).ok_or_else(|| anyhow!("empty image {}", stimulus.path.display()))?;
        for (dst, px) in source.pixels_mut().iter_mut().zip(decoded.pixels()) {
            let [r, g, b, a] = px.0;
            *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
        }

        let scaled = Arc::new(fit_into(&source, self.width, self.height)?);
        self.image_cache.insert(key, Arc::clone(&scaled));
        Ok(scaled)
    }

    /// Redraws the canvas from the three layers and publishes the frame.
    fn compose(&mut self) {
        self.canvas.fill(Color::BLACK);
        let (cx, cy) = self.center;
        if let Some(image) = &self.image {
            blit_centered(&mut self.canvas, image, cx, cy);
        }
        if let Some(overlay) = &self.overlay {
            blit_centered(&mut self.canvas, overlay, cx, cy);
        }
        if let Some(readout) = &self.readout {
            let x = self.width as i32 - readout.width() as i32 - 40;
            blit(&mut self.canvas, readout, x, 40);
        }
        self.frames += 1;

        if !self.mirrors.is_empty() {
            let frame = Arc::new(self.canvas.clone());
            self.mirrors.retain(|m| m.send(Arc::clone(&frame)).is_ok());
        }
    }

    fn set_layers(&mut self, overlay: Option<Arc<Pixmap>>, image: Option<Arc<Pixmap>>) {
        self.overlay = overlay;
        self.image = image;
        self.readout = None;
        self.compose();
    }
}

impl<T: Timer<Timestamp = u64>> Presenter for SkiaPresenter<T> {
    fn show_instruction(&mut self, text: &str) -> Result<()> {
        self.crosshair = None;
        let overlay = self.text(text, INSTRUCTION_PX);
        self.set_layers(overlay, None);
        Ok(())
    }

    fn show_crosshair(&mut self, duration: Duration) -> Result<()> {
        self.crosshair = Some(Countdown::start(self.timer.now(), duration));
        let cross = Arc::clone(&self.cross);
        self.set_layers(Some(cross), None);
        Ok(())
    }

    fn show_image(&mut self, element: &Element) -> Result<()> {
        match element {
            Element::Image(stimulus) => {
                self.crosshair = None;
                let image = self.load_image(stimulus)?;
                self.set_layers(None, Some(image));
                Ok(())
            }
            Element::CravingPrompt { .. } => self.show_rating_prompt(),
        }
    }

    fn show_rating_prompt(&mut self) -> Result<()> {
        self.crosshair = None;
        let overlay = self.text(RATING_PROMPT, INSTRUCTION_PX);
        self.set_layers(overlay, None);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.crosshair = None;
        self.set_layers(None, None);
        Ok(())
    }

    fn tick_timer(&mut self, remaining_ms: u64) -> Result<()> {
        let readout = self.text(&timer_readout(remaining_ms), TIMER_PX);
        if readout.as_ref().map(Arc::as_ptr) != self.readout.as_ref().map(Arc::as_ptr) {
            self.readout = readout;
            self.compose();
        }
        Ok(())
    }

    fn elapsed(&self) -> bool {
        self.crosshair
            .as_ref()
            .is_none_or(|c| c.is_done(self.timer.now()))
    }
}

fn blank(width: u32, height: u32) -> Result<Pixmap> {
    let mut pm = Pixmap::new(width, height).ok_or_else(|| anyhow!("invalid surface {width}x{height}"))?;
    pm.fill(Color::BLACK);
    Ok(pm)
}

fn fixation_cross() -> Result<Pixmap> {
    let mut pm = Pixmap::new(CROSS_SIZE, CROSS_SIZE).ok_or_else(|| anyhow!("cross pixmap"))?;
    let mut paint = Paint::default();
    paint.anti_alias = false;
    paint.set_color(Color::WHITE);
    let size = CROSS_SIZE as f32;
    let bars = [
        Rect::from_xywh(0.0, (size - CROSS_BAR) * 0.5, size, CROSS_BAR),
        Rect::from_xywh((size - CROSS_BAR) * 0.5, 0.0, CROSS_BAR, size),
    ];
    for bar in bars.into_iter().flatten() {
        pm.fill_rect(bar, &paint, Transform::identity(), None);
    }
    Ok(pm)
}

/// Scales `source` down (never up) to fit the surface, keeping its aspect.
fn fit_into(source: &Pixmap, width: u32, height: u32) -> Result<Pixmap> {
    let scale = (width as f32 / source.width() as f32)
        .min(height as f32 / source.height() as f32)
        .min(1.0);
    let w = ((source.width() as f32 * scale).round() as u32).max(1);
    let h = ((source.height() as f32 * scale).round() as u32).max(1);
    let mut out = Pixmap::new(w, h).ok_or_else(|| anyhow!("scaled pixmap {w}x{h}"))?;
    let paint = PixmapPaint {
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    out.draw_pixmap(0, 0, source.as_ref(), &paint, Transform::from_scale(scale, scale), None);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuex_core::Origin;
    use cuex_timing::ManualTimer;
    use std::path::PathBuf;

    fn write_png(name: &str, w: u32, h: u32, rgba: [u8; 4]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cuex-render-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        image::RgbaImage::from_pixel(w, h, image::Rgba(rgba)).save(&path).unwrap();
        path
    }

    fn presenter() -> (SkiaPresenter<ManualTimer>, ManualTimer) {
        let timer = ManualTimer::new();
        (SkiaPresenter::new(200, 100, None, timer.clone()).unwrap(), timer)
    }

    #[test]
    fn image_layer_is_centered_and_scaled() {
        let (mut p, _) = presenter();
        let path = write_png("red.png", 400, 100, [255, 0, 0, 255]);
        let element = Element::Image(ImageStimulus::new(path, Origin::Neutral));
        p.show_image(&element).unwrap();

        let center = p.frame().pixel(100, 50).unwrap();
        assert_eq!((center.red(), center.alpha()), (255, 255));
        // 400x100 fits as 200x50, leaving bands above and below.
        assert_eq!(p.frame().pixel(100, 10).unwrap().red(), 0);

        p.show_image(&element).unwrap();
        assert_eq!(p.stats().cached_images, 1);
    }

    #[test]
    fn missing_image_is_an_error() {
        let (mut p, _) = presenter();
        let element = Element::Image(ImageStimulus::new("/nonexistent/x.png", Origin::Neutral));
        assert!(p.show_image(&element).is_err());
    }

    #[test]
    fn crosshair_reports_elapsed_against_the_timer() {
        let (mut p, timer) = presenter();
        assert!(p.elapsed());
        p.show_crosshair(Duration::from_millis(2500)).unwrap();
        assert_eq!(p.frame().pixel(100, 50).unwrap().red(), 255);
        assert!(!p.elapsed());
        timer.advance_ms(2499);
        assert!(!p.elapsed());
        timer.advance_ms(1);
        assert!(p.elapsed());
    }

    #[test]
    fn mirror_receives_every_frame() {
        let (mut p, _) = presenter();
        let mirror = p.subscribe_mirror();
        p.show_crosshair(Duration::from_secs(1)).unwrap();
        p.clear().unwrap();
        let frames: Vec<_> = mirror.try_iter().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].pixel(100, 50).unwrap().red(), 255);
        assert_eq!(frames[1].pixel(100, 50).unwrap().red(), 0);

        drop(mirror);
        p.clear().unwrap();
        assert!(p.mirrors.is_empty());
    }

    #[test]
    fn text_without_font_is_blank() {
        let (mut p, _) = presenter();
        p.show_instruction("Press SPACE to begin").unwrap();
        p.show_rating_prompt().unwrap();
        p.tick_timer(3000).unwrap();
        assert!(p.frame().pixels().iter().all(|px| px.red() == 0));
    }
}
