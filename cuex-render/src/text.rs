use ab_glyph::{point, Font, FontVec, Glyph, PxScale, ScaleFont};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use string_cache::DefaultAtom as Atom;
use tiny_skia::{Color, Pixmap, PremultipliedColorU8};

pub fn load_font(path: &Path) -> anyhow::Result<FontVec> {
    let bytes = std::fs::read(path)?;
    Ok(FontVec::try_from_vec(bytes)?)
}

fn line_width<F: Font>(font: &F, scale: PxScale, text: &str) -> f32 {
    let sf = font.as_scaled(scale);
    let mut width = 0.0;
    let mut prev = None;
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(p) = prev {
            width += sf.kern(p, id);
        }
        width += sf.h_advance(id);
        prev = Some(id);
    }
    width
}

/// Greedy word wrap. Explicit newlines always break.
pub fn wrap_lines<F: Font>(font: &F, font_size: f32, text: &str, max_width: f32) -> Vec<String> {
    let scale = PxScale::from(font_size);
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{line} {word}")
            };
            if !line.is_empty() && line_width(font, scale, &candidate) > max_width {
                lines.push(std::mem::replace(&mut line, word.to_string()));
            } else {
                line = candidate;
            }
        }
        lines.push(line);
    }
    lines
}

/// Rasterizes one line of text into a tight, premultiplied pixmap.
/// Returns `None` when nothing in `text` has an outline.
pub fn render_text_pixmap<F: Font>(text: &str, font_size: f32, font: &F, color: Color) -> Option<Pixmap> {
    let scale = PxScale::from(font_size);
    let sf = font.as_scaled(scale);

    // Layout with the baseline at ascent.
    let mut pen_x = 0.0f32;
    let mut glyphs = Vec::<Glyph>::new();
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = glyphs.last() {
            pen_x += sf.kern(prev.id, id);
        }
        glyphs.push(Glyph {
            id,
            scale,
            position: point(pen_x, sf.ascent()),
        });
        pen_x += sf.h_advance(id);
    }

    let outlines: Vec<_> = glyphs
        .into_iter()
        .filter_map(|g| font.outline_glyph(g))
        .collect();
    let (min_x, min_y, max_x, max_y) = outlines.iter().fold(
        (f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        |(x0, y0, x1, y1), o| {
            let b = o.px_bounds();
            (x0.min(b.min.x), y0.min(b.min.y), x1.max(b.max.x), y1.max(b.max.y))
        },
    );
    if outlines.is_empty() {
        return None;
    }

    let w = (max_x.ceil() - min_x.floor()).max(1.0) as u32;
    let h = (max_y.ceil() - min_y.floor()).max(1.0) as u32;
    let mut pm = Pixmap::new(w, h)?;
    let stride = w as usize;
    let dst = pm.pixels_mut();

    let cu = color.to_color_u8();
    for out in &outlines {
        let b = out.px_bounds();
        out.draw(|x, y, cov| {
            if cov <= f32::EPSILON {
                return;
            }
            let ix = (x as f32 + b.min.x - min_x).floor() as i32;
            let iy = (y as f32 + b.min.y - min_y).floor() as i32;
            if ix < 0 || iy < 0 || ix >= w as i32 || iy >= h as i32 {
                return;
            }
            let i = iy as usize * stride + ix as usize;

            // Source premultiplied by coverage, then src-over.
            let a_lin = (cov * cu.alpha() as f32 / 255.0).clamp(0.0, 1.0);
            let sa = (a_lin * 255.0) as u8;
            let inv = 1.0 - a_lin;
            let bg = dst[i];
            let mix = |s: u8, d: u8| ((s as f32 * a_lin) as u8).saturating_add((d as f32 * inv) as u8);
            let r = mix(cu.red(), bg.red());
            let g = mix(cu.green(), bg.green());
            let bl = mix(cu.blue(), bg.blue());
            let a = sa.saturating_add((bg.alpha() as f32 * inv) as u8);
            if let Some(px) = PremultipliedColorU8::from_rgba(r.min(a), g.min(a), bl.min(a), a) {
                dst[i] = px;
            }
        });
    }
    Some(pm)
}

/// Stacks wrapped lines into one pixmap, each line centered.
pub fn render_text_block<F: Font>(
    text: &str,
    font_size: f32,
    font: &F,
    color: Color,
    max_width: f32,
) -> Option<Pixmap> {
    let line_height = font.as_scaled(PxScale::from(font_size)).height() * 1.3;
    let rendered: Vec<Option<Pixmap>> = wrap_lines(font, font_size, text, max_width)
        .iter()
        .map(|l| render_text_pixmap(l, font_size, font, color))
        .collect();
    let width = rendered.iter().flatten().map(Pixmap::width).max()?;
    let height = (line_height * rendered.len() as f32).ceil() as u32;
    let mut block = Pixmap::new(width, height.max(1))?;
    for (row, line) in rendered.iter().enumerate() {
        if let Some(line) = line {
            let x = (width - line.width()) as i32 / 2;
            let y = (row as f32 * line_height) as i32;
            crate::blit::blit(&mut block, line, x, y);
        }
    }
    Some(block)
}

/// Rendered text keyed by interned string and pixel size.
pub(crate) struct TextCache {
    font: Option<FontVec>,
    map: HashMap<(Atom, u32), Arc<Pixmap>>,
}

impl TextCache {
    pub(crate) fn new(font: Option<FontVec>) -> Self {
        if font.is_none() {
            tracing::warn!("no font configured, text layers stay blank");
        }
        Self {
            font,
            map: HashMap::new(),
        }
    }

    pub(crate) fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub(crate) fn get_or_render(&mut self, text: &str, size_px: f32, max_width: f32) -> Option<Arc<Pixmap>> {
        let font = self.font.as_ref()?;
        let key = (Atom::from(text), size_px.to_bits());
        if let Some(p) = self.map.get(&key) {
            return Some(Arc::clone(p));
        }
        let pm = Arc::new(render_text_block(text, size_px, font, Color::WHITE, max_width)?);
        self.map.insert(key, Arc::clone(&pm));
        Some(pm)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}
