// ============================================================================
// TRANSFORM OPERATIONS — fractional crops, resampling, pixelated previews
// ============================================================================

use image::{Rgba, RgbaImage, imageops};
use rayon::prelude::*;

use crate::error::EngineError;
use crate::geometry::{DisplayMapping, Rect, Size};

/// Interpolation method for crop/resample operations.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
}

/// Crop `rect` (source pixels, may be fractional) out of `src` and resample
/// it to exactly `out_w`×`out_h`. Samples outside the image clamp to the edge.
pub fn crop_resampled(
    src: &RgbaImage,
    rect: Rect,
    out_w: u32,
    out_h: u32,
    interp: Interpolation,
) -> Result<RgbaImage, EngineError> {
    if src.width() == 0 || src.height() == 0 {
        return Err(EngineError::Raster("source image is empty".to_string()));
    }
    if rect.is_degenerate() {
        return Err(EngineError::Raster(format!("degenerate crop rect {:?}", rect)));
    }
    if out_w == 0 || out_h == 0 {
        return Err(EngineError::Raster(format!(
            "invalid output size {}×{}",
            out_w, out_h
        )));
    }

    let step_x = rect.w / out_w as f32;
    let step_y = rect.h / out_h as f32;
    let stride = out_w as usize * 4;
    let mut dst_raw = vec![0u8; stride * out_h as usize];

    dst_raw
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(oy, row_out)| {
            // Pixel centres in source space.
            let sy = rect.y + (oy as f32 + 0.5) * step_y;
            for ox in 0..out_w as usize {
                let sx = rect.x + (ox as f32 + 0.5) * step_x;
                let p = match interp {
                    Interpolation::Nearest => nearest_sample(src, sx, sy),
                    Interpolation::Bilinear => bilinear_sample(src, sx - 0.5, sy - 0.5),
                };
                row_out[ox * 4..ox * 4 + 4].copy_from_slice(&p.0);
            }
        });

    RgbaImage::from_raw(out_w, out_h, dst_raw)
        .ok_or_else(|| EngineError::Raster("resample buffer size mismatch".to_string()))
}

/// The raw selection at its native resolution, sampled nearest-neighbour.
/// Shown scaled up during the zoom-in, it reads as a pixelated placeholder.
pub fn pixelated_crop(src: &RgbaImage, selection: Rect) -> Result<RgbaImage, EngineError> {
    let w = selection.w.round().max(1.0) as u32;
    let h = selection.h.round().max(1.0) as u32;
    crop_resampled(src, selection, w, h, Interpolation::Nearest)
}

/// Nearest-neighbour upscale of a preview to the size of the final crop, so
/// the dissolve can run between two equal-dimension buffers.
pub fn scale_nearest(img: &RgbaImage, out_w: u32, out_h: u32) -> RgbaImage {
    if img.width() == out_w && img.height() == out_h {
        return img.clone();
    }
    imageops::resize(img, out_w.max(1), out_h.max(1), imageops::FilterType::Nearest)
}

/// Local fallback when the enhancement pipeline fails: the raw selection at
/// twice its native resolution, no external calls involved.
pub fn fallback_crop(src: &RgbaImage, selection: Rect) -> Result<RgbaImage, EngineError> {
    let w = (selection.w * 2.0).round().max(1.0) as u32;
    let h = (selection.h * 2.0).round().max(1.0) as u32;
    crop_resampled(src, selection, w, h, Interpolation::Bilinear)
}

/// Render `image` letterboxed into a `container`-sized canvas on black, the
/// way it appears on screen under `mapping`.
pub fn render_letterboxed(image: &RgbaImage, container: Size, mapping: &DisplayMapping) -> RgbaImage {
    let cw = container.w.round().max(1.0) as u32;
    let ch = container.h.round().max(1.0) as u32;
    let mut canvas = RgbaImage::from_pixel(cw, ch, Rgba([0, 0, 0, 255]));
    let dw = mapping.display_width.round() as u32;
    let dh = mapping.display_height.round() as u32;
    if dw == 0 || dh == 0 || image.width() == 0 || image.height() == 0 {
        return canvas;
    }
    let scaled = imageops::resize(image, dw, dh, imageops::FilterType::Triangle);
    imageops::overlay(
        &mut canvas,
        &scaled,
        mapping.offset_x.round() as i64,
        mapping.offset_y.round() as i64,
    );
    canvas
}

fn nearest_sample(img: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    let sx = (x.floor() as i64).clamp(0, img.width() as i64 - 1) as u32;
    let sy = (y.floor() as i64).clamp(0, img.height() as i64 - 1) as u32;
    *img.get_pixel(sx, sy)
}

/// Bilinear interpolation sampling from an RgbaImage, clamped to the edge.
fn bilinear_sample(img: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let max_x = img.width() as i64 - 1;
    let max_y = img.height() as i64 - 1;

    let sample = |sx: i64, sy: i64| -> [f32; 4] {
        let p = img.get_pixel(sx.clamp(0, max_x) as u32, sy.clamp(0, max_y) as u32);
        [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
    };

    let tl = sample(x0, y0);
    let tr = sample(x0 + 1, y0);
    let bl = sample(x0, y0 + 1);
    let br = sample(x0 + 1, y0 + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = lerp(tl[c], tr[c], fx);
        let bot = lerp(bl[c], br[c], fx);
        out[c] = lerp(top, bot, fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::compute_display_mapping;

    fn quadrants(size: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            let half = size / 2;
            match (x < half, y < half) {
                (true, true) => Rgba([255, 0, 0, 255]),
                (false, true) => Rgba([0, 255, 0, 255]),
                (true, false) => Rgba([0, 0, 255, 255]),
                (false, false) => Rgba([255, 255, 255, 255]),
            }
        })
    }

    #[test]
    fn test_crop_resampled_picks_the_right_region() {
        let img = quadrants(100);
        let out = crop_resampled(&img, Rect::new(50.0, 0.0, 50.0, 50.0), 10, 10, Interpolation::Nearest).unwrap();
        assert_eq!(out.dimensions(), (10, 10));
        assert!(out.pixels().all(|p| *p == Rgba([0, 255, 0, 255])));
    }

    #[test]
    fn test_crop_resampled_rejects_degenerate_rect() {
        let img = quadrants(10);
        assert!(crop_resampled(&img, Rect::new(0.0, 0.0, 0.0, 5.0), 4, 4, Interpolation::Bilinear).is_err());
        assert!(crop_resampled(&img, Rect::new(0.0, 0.0, 5.0, 5.0), 0, 4, Interpolation::Bilinear).is_err());
    }

    #[test]
    fn test_pixelated_crop_is_native_resolution() {
        let img = quadrants(100);
        let out = pixelated_crop(&img, Rect::new(10.0, 10.0, 30.0, 20.0)).unwrap();
        assert_eq!(out.dimensions(), (30, 20));
        assert_eq!(*out.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_fallback_crop_doubles_resolution() {
        let img = quadrants(100);
        let out = fallback_crop(&img, Rect::new(0.0, 0.0, 25.0, 40.0)).unwrap();
        assert_eq!(out.dimensions(), (50, 80));
    }

    #[test]
    fn test_render_letterboxed_fills_bars_black() {
        let img = RgbaImage::from_pixel(200, 100, Rgba([255, 255, 255, 255]));
        let container = Size::new(100.0, 100.0);
        let mapping = compute_display_mapping(container, Size::of_image(&img));
        let out = render_letterboxed(&img, container, &mapping);
        assert_eq!(out.dimensions(), (100, 100));
        assert_eq!(*out.get_pixel(50, 5), Rgba([0, 0, 0, 255]));
        assert_eq!(*out.get_pixel(50, 50), Rgba([255, 255, 255, 255]));
    }
}
