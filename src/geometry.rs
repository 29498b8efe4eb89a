// ============================================================================
// GEOMETRY — rectangles and the mappings between coordinate spaces
// ============================================================================
//
// A `Rect` carries no space tag of its own. Every function below documents
// which space its inputs and outputs live in, and a rect is never reused
// across spaces without going through one of these transforms:
//
//   display  — the on-screen container, letterboxed image inside it
//   source   — pixels of the image at the current history step
//   padded   — the selection grown by a padding factor (still source pixels)
//   enhanced — pixels of the image returned by the enhancement service
//   final    — pixels of the committed high-resolution crop

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle with non-negative width and height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// Width/height pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub w: f32,
    pub h: f32,
}

/// Point in some coordinate space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Size {
    pub fn new(w: f32, h: f32) -> Self {
        Self { w, h }
    }

    pub fn of_image(image: &image::RgbaImage) -> Self {
        Self::new(image.width() as f32, image.height() as f32)
    }
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            x,
            y,
            w: w.max(0.0),
            h: h.max(0.0),
        }
    }

    /// Rect covering `size` with its origin at zero.
    pub fn full(size: Size) -> Self {
        Self::new(0.0, 0.0, size.w, size.h)
    }

    /// Normalized rect spanning two corners in any order.
    pub fn from_corners(a: Point, b: Point) -> Self {
        let x0 = a.x.min(b.x);
        let y0 = a.y.min(b.y);
        Self::new(x0, y0, (a.x - b.x).abs(), (a.y - b.y).abs())
    }

    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    pub fn size(&self) -> Size {
        Size::new(self.w, self.h)
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.w > 0.0 && self.h > 0.0) || !self.x.is_finite() || !self.y.is_finite()
    }

    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    /// True when `other` lies entirely inside `self` (within `eps`).
    pub fn contains_rect(&self, other: &Rect, eps: f32) -> bool {
        other.x >= self.x - eps
            && other.y >= self.y - eps
            && other.right() <= self.right() + eps
            && other.bottom() <= self.bottom() + eps
    }

    /// Width divided by height; 1.0 for a zero-height rect.
    pub fn aspect(&self) -> f32 {
        if self.h > 0.0 { self.w / self.h } else { 1.0 }
    }
}

/// Affine mapping between display space and source space produced by
/// letterboxing an image into a container.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayMapping {
    /// Display pixels per source pixel.
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub display_width: f32,
    pub display_height: f32,
}

impl DisplayMapping {
    /// Where the image itself sits inside the container (display space).
    pub fn image_rect(&self) -> Rect {
        Rect::new(
            self.offset_x,
            self.offset_y,
            self.display_width,
            self.display_height,
        )
    }

    pub fn to_source_point(&self, p: Point) -> Point {
        Point::new(
            (p.x - self.offset_x) / self.scale,
            (p.y - self.offset_y) / self.scale,
        )
    }
}

/// Fit `image` into `container` preserving its aspect ratio; the shorter
/// axis is letterboxed and the image centred.
pub fn compute_display_mapping(container: Size, image: Size) -> DisplayMapping {
    if image.w <= 0.0 || image.h <= 0.0 || container.w <= 0.0 || container.h <= 0.0 {
        return DisplayMapping {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            display_width: 0.0,
            display_height: 0.0,
        };
    }
    let scale = (container.w / image.w).min(container.h / image.h);
    let display_width = image.w * scale;
    let display_height = image.h * scale;
    DisplayMapping {
        scale,
        offset_x: (container.w - display_width) / 2.0,
        offset_y: (container.h - display_height) / 2.0,
        display_width,
        display_height,
    }
}

/// Display space → source space. The result may be fractional.
pub fn to_source_rect(display_rect: Rect, mapping: &DisplayMapping) -> Rect {
    Rect::new(
        (display_rect.x - mapping.offset_x) / mapping.scale,
        (display_rect.y - mapping.offset_y) / mapping.scale,
        display_rect.w / mapping.scale,
        display_rect.h / mapping.scale,
    )
}

/// Source space → display space.
pub fn to_display_rect(source_rect: Rect, mapping: &DisplayMapping) -> Rect {
    Rect::new(
        source_rect.x * mapping.scale + mapping.offset_x,
        source_rect.y * mapping.scale + mapping.offset_y,
        source_rect.w * mapping.scale,
        source_rect.h * mapping.scale,
    )
}

/// Box of `image_size * size_fraction` centred on `click` (source space),
/// shifted (never shrunk) so it stays inside `[0, image_size]`.
pub fn compute_fixed_box(click: Point, image_size: Size, size_fraction: f32) -> Rect {
    let fraction = size_fraction.clamp(0.0, 1.0);
    let w = image_size.w * fraction;
    let h = image_size.h * fraction;
    let x = (click.x - w / 2.0).clamp(0.0, (image_size.w - w).max(0.0));
    let y = (click.y - h / 2.0).clamp(0.0, (image_size.h - h).max(0.0));
    Rect::new(x, y, w, h)
}

/// Grow `selection` by `padding_factor` of its own size on every side, then
/// clamp to `[0, source_size]`. Clamping may leave the padding asymmetric.
pub fn compute_padded_rect(selection: Rect, source_size: Size, padding_factor: f32) -> Rect {
    let pad_x = selection.w * padding_factor;
    let pad_y = selection.h * padding_factor;
    let x0 = (selection.x - pad_x).max(0.0);
    let y0 = (selection.y - pad_y).max(0.0);
    let x1 = (selection.right() + pad_x).min(source_size.w);
    let y1 = (selection.bottom() + pad_y).min(source_size.h);
    Rect::new(x0, y0, x1 - x0, y1 - y0)
}

/// Locate `original` inside an image that depicts `padded`.
///
/// `target` is the extent of that image in its own pixel space (usually
/// `Rect::full(enhanced_size)`). Each axis is mapped by linear proportion
/// independently, so a service that returns a different size or aspect than
/// requested still yields the right crop.
pub fn map_inner_rect(target: Rect, original: Rect, padded: Rect) -> Rect {
    if padded.w <= 0.0 || padded.h <= 0.0 {
        return target;
    }
    let sx = target.w / padded.w;
    let sy = target.h / padded.h;
    Rect::new(
        target.x + (original.x - padded.x) * sx,
        target.y + (original.y - padded.y) * sy,
        original.w * sx,
        original.h * sy,
    )
}

/// Largest rect with `aspect` (w / h) that fits centred inside `viewport`.
pub fn fit_rect(aspect: Size, viewport: Size) -> Rect {
    compute_display_mapping(viewport, aspect).image_rect()
}

/// Output pixel size for a crop of `rect` scaled to `width`, keeping the
/// rect's aspect ratio. Never returns zero on either axis.
pub fn scaled_dimensions(rect: Rect, width: u32) -> (u32, u32) {
    let w = width.max(1);
    let h = if rect.w > 0.0 {
        (w as f32 * rect.h / rect.w).round().max(1.0) as u32
    } else {
        w
    };
    (w, h)
}
