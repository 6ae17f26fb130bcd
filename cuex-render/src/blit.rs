use bytemuck::{cast_slice, cast_slice_mut};
use tiny_skia::Pixmap;

/// Copies `src` onto `dst` with its top-left corner at `(x, y)`, clipped to
/// `dst`. Opaque sources are copied row by row; anything else is blended
/// src-over in premultiplied space.
pub fn blit(dst: &mut Pixmap, src: &Pixmap, x: i32, y: i32) {
    let (dw, dh) = (dst.width() as i32, dst.height() as i32);
    let (sw, sh) = (src.width() as i32, src.height() as i32);
    if x + sw <= 0 || y + sh <= 0 || x >= dw || y >= dh {
        return;
    }

    let dst_x = x.max(0) as usize;
    let dst_y = y.max(0) as usize;
    let src_x = (-x).max(0) as usize;
    let src_y = (-y).max(0) as usize;
    let copy_w = ((sw as usize) - src_x).min(dw as usize - dst_x);
    let copy_h = ((sh as usize) - src_y).min(dh as usize - dst_y);
    let (src_stride, dst_stride) = (sw as usize, dw as usize);

    let src_u32: &[u32] = cast_slice(src.data());
    let dst_u32: &mut [u32] = cast_slice_mut(dst.data_mut());

    let fully_opaque = (0..copy_h).all(|row| {
        let start = (src_y + row) * src_stride + src_x;
        src_u32[start..start + copy_w].iter().all(|p| p >> 24 == 0xFF)
    });

    for row in 0..copy_h {
        let s0 = (src_y + row) * src_stride + src_x;
        let d0 = (dst_y + row) * dst_stride + dst_x;
        if fully_opaque {
            dst_u32[d0..d0 + copy_w].copy_from_slice(&src_u32[s0..s0 + copy_w]);
            continue;
        }
        for i in 0..copy_w {
            let s = src_u32[s0 + i];
            let d = dst_u32[d0 + i];
            let inv = 255 - (s >> 24);
            let channel = |shift: u32| {
                let sc = (s >> shift) & 0xFF;
                let dc = (d >> shift) & 0xFF;
                (sc + (dc * inv + 127) / 255).min(255)
            };
            dst_u32[d0 + i] = (channel(24) << 24) | (channel(16) << 16) | (channel(8) << 8) | channel(0);
        }
    }
}

/// Blits `src` centered on `(cx, cy)`.
pub fn blit_centered(dst: &mut Pixmap, src: &Pixmap, cx: f32, cy: f32) {
    let x = (cx - src.width() as f32 * 0.5).floor() as i32;
    let y = (cy - src.height() as f32 * 0.5).floor() as i32;
    blit(dst, src, x, y);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiny_skia::Color;

    #[test]
    fn opaque_blit_is_clipped() {
        let mut dst = Pixmap::new(4, 4).unwrap();
        let mut src = Pixmap::new(3, 3).unwrap();
        src.fill(Color::from_rgba8(255, 0, 0, 255));
        blit(&mut dst, &src, 2, -1);
        assert_eq!(dst.pixel(3, 0).unwrap().red(), 255);
        assert_eq!(dst.pixel(3, 2).unwrap().alpha(), 0);
        assert_eq!(dst.pixel(1, 0).unwrap().alpha(), 0);
    }

    #[test]
    fn translucent_blit_blends_over() {
        let mut dst = Pixmap::new(1, 1).unwrap();
        dst.fill(Color::from_rgba8(0, 0, 255, 255));
        let mut src = Pixmap::new(1, 1).unwrap();
        src.fill(Color::from_rgba8(255, 0, 0, 128));
        blit(&mut dst, &src, 0, 0);
        let px = dst.pixel(0, 0).unwrap();
        assert_eq!(px.alpha(), 255);
        assert!(px.red() > 100 && px.blue() > 100);
    }
}
