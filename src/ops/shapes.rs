// ============================================================================
// SHAPES — rectangle outlines rasterized straight into RGBA buffers
// ============================================================================

use image::{Rgba, RgbaImage};

use crate::geometry::Rect;

/// Stroke style for rectangle outlines.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LinePattern {
    Solid,
    /// `dash` px on, `gap` px off, walking clockwise from the top-left corner.
    Dashed { dash: f32, gap: f32 },
}

/// Outline colour used for selection boxes.
pub const SELECTION_COLOR: Rgba<u8> = Rgba([255, 64, 64, 255]);

/// Draw the outline of `rect` (image pixel space) into `img`. The stroke is
/// drawn inward from the rect's edges; parts outside the image are skipped.
pub fn stroke_rect(img: &mut RgbaImage, rect: Rect, width: u32, color: Rgba<u8>, pattern: LinePattern) {
    if rect.is_degenerate() || img.width() == 0 || img.height() == 0 {
        return;
    }
    let width = width.max(1) as f32;
    let (x0, y0) = (rect.x, rect.y);
    let (x1, y1) = (rect.right() - 1.0, rect.bottom() - 1.0);

    // Perimeter walked as four segments so the dash phase carries across corners.
    let edges = [
        ((x0, y0), (x1, y0), (0.0, 1.0)),
        ((x1, y0), (x1, y1), (-1.0, 0.0)),
        ((x1, y1), (x0, y1), (0.0, -1.0)),
        ((x0, y1), (x0, y0), (1.0, 0.0)),
    ];
    let mut offset = 0.0;
    for (a, b, inward) in edges {
        draw_segment(img, a, b, inward, width, color, pattern, offset);
        offset += (b.0 - a.0).abs() + (b.1 - a.1).abs();
    }
}

/// Draw a thick axis-aligned segment from `a` to `b`, thickened along `inward`.
fn draw_segment(
    img: &mut RgbaImage,
    a: (f32, f32),
    b: (f32, f32),
    inward: (f32, f32),
    width: f32,
    color: Rgba<u8>,
    pattern: LinePattern,
    offset: f32,
) {
    let len = (b.0 - a.0).abs() + (b.1 - a.1).abs();
    let steps = len.ceil().max(1.0) as u32;
    let dir = if len > 0.0 {
        ((b.0 - a.0) / len, (b.1 - a.1) / len)
    } else {
        (0.0, 0.0)
    };
    for i in 0..=steps {
        let t = (i as f32).min(len);
        if !pattern_on(pattern, offset + t) {
            continue;
        }
        let px = a.0 + dir.0 * t;
        let py = a.1 + dir.1 * t;
        for k in 0..width as u32 {
            let x = (px + inward.0 * k as f32).round();
            let y = (py + inward.1 * k as f32).round();
            if x >= 0.0 && y >= 0.0 && (x as u32) < img.width() && (y as u32) < img.height() {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

fn pattern_on(pattern: LinePattern, distance: f32) -> bool {
    match pattern {
        LinePattern::Solid => true,
        LinePattern::Dashed { dash, gap } => {
            let period = dash + gap;
            period <= 0.0 || distance.rem_euclid(period) < dash
        }
    }
}
