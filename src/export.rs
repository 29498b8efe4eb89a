// ============================================================================
// ZOOM EXPORT — replay the history path as an eased camera move
// ============================================================================
//
// For every consecutive pair of steps the camera starts on the full extent of
// step i and eases into step i+1's selection (which lives in step i's source
// space), with a dashed box marking where that selection sits in the current
// view. It then holds on step i+1. Frames render in parallel and are encoded
// in order into one looping GIF.

use image::{Rgba, RgbaImage, imageops};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::animation::{ease_in_out_cubic, lerp_rect};
use crate::components::history::HistoryStep;
use crate::error::ExportError;
use crate::geometry::{DisplayMapping, Rect, Size, compute_display_mapping};
use crate::io::encode_animated_gif;
use crate::ops::shapes::{LinePattern, SELECTION_COLOR, stroke_rect};
use crate::ops::transform::{Interpolation, crop_resampled, render_letterboxed};

const TARGET_DASH: LinePattern = LinePattern::Dashed { dash: 8.0, gap: 6.0 };
const TARGET_STROKE: u32 = 2;

/// Output geometry and timing of the zoom animation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub width: u32,
    pub height: u32,
    /// Frames spent easing from one step into the next.
    pub zoom_frames: u32,
    /// Frames spent resting on each newly reached step.
    pub hold_frames: u32,
    pub fps: u32,
    /// Palette size per frame (2..=256).
    pub max_colors: u16,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            zoom_frames: 30,
            hold_frames: 15,
            fps: 30,
            max_colors: 256,
        }
    }
}

impl ExportOptions {
    pub fn frames_per_step(&self) -> usize {
        (self.zoom_frames + self.hold_frames) as usize
    }
}

/// One frame to render.
#[derive(Clone, Copy, Debug)]
enum FrameSpec {
    /// `view` and `target` are in the source space of `steps[step]`.
    Zoom { step: usize, view: Rect, target: Rect },
    Hold { step: usize },
}

/// Render `steps` (root first, at least two) as an animated GIF.
/// Any failure aborts the export and nothing is returned.
pub fn export_zoom(steps: &[HistoryStep], options: &ExportOptions) -> Result<Vec<u8>, ExportError> {
    if steps.len() < 2 {
        return Err(ExportError::TooFewSteps(steps.len()));
    }
    if options.width == 0
        || options.height == 0
        || options.width > u16::MAX as u32
        || options.height > u16::MAX as u32
    {
        return Err(ExportError::FrameTooLarge {
            width: options.width,
            height: options.height,
        });
    }

    let specs = plan_frames(steps, options)?;
    tracing::info!(
        steps = steps.len(),
        frames = specs.len(),
        width = options.width,
        height = options.height,
        "zoom export: rendering"
    );

    let frame_size = Size::new(options.width as f32, options.height as f32);
    let frames = specs
        .par_iter()
        .map(|spec| render_frame(steps, *spec, frame_size))
        .collect::<Result<Vec<_>, _>>()?;

    let bytes = encode_animated_gif(&frames, options.fps as f32, options.max_colors)?;
    tracing::info!(bytes = bytes.len(), "zoom export: encoded");
    Ok(bytes)
}

fn plan_frames(steps: &[HistoryStep], options: &ExportOptions) -> Result<Vec<FrameSpec>, ExportError> {
    let mut specs = Vec::with_capacity((steps.len() - 1) * options.frames_per_step());
    for (i, pair) in steps.windows(2).enumerate() {
        let start = Rect::full(Size::of_image(&pair[0].image));
        let target = pair[1]
            .selection
            .filter(|r| !r.is_degenerate())
            .ok_or(ExportError::MissingSelection { index: i + 1 })?;

        let n = options.zoom_frames;
        for f in 0..n {
            let t = if n > 1 { f as f32 / (n - 1) as f32 } else { 1.0 };
            let view = lerp_rect(start, target, ease_in_out_cubic(t));
            specs.push(FrameSpec::Zoom { step: i, view, target });
        }
        for _ in 0..options.hold_frames {
            specs.push(FrameSpec::Hold { step: i + 1 });
        }
    }
    Ok(specs)
}

fn render_frame(steps: &[HistoryStep], spec: FrameSpec, frame_size: Size) -> Result<RgbaImage, ExportError> {
    match spec {
        FrameSpec::Hold { step } => {
            let image = &steps[step].image;
            let mapping = compute_display_mapping(frame_size, Size::of_image(image));
            Ok(render_letterboxed(image, frame_size, &mapping))
        }
        FrameSpec::Zoom { step, view, target } => {
            let mapping = compute_display_mapping(frame_size, view.size());
            let mut frame = letterboxed_crop(&steps[step].image, view, frame_size, &mapping)?;
            stroke_rect(
                &mut frame,
                view_to_frame(target, view, &mapping),
                TARGET_STROKE,
                SELECTION_COLOR,
                TARGET_DASH,
            );
            Ok(frame)
        }
    }
}

/// Crop `view` out of `image` and letterbox it into the output frame.
fn letterboxed_crop(
    image: &RgbaImage,
    view: Rect,
    frame_size: Size,
    mapping: &DisplayMapping,
) -> Result<RgbaImage, ExportError> {
    let mut frame = RgbaImage::from_pixel(
        frame_size.w as u32,
        frame_size.h as u32,
        Rgba([0, 0, 0, 255]),
    );
    let dw = (mapping.display_width.round() as u32).max(1);
    let dh = (mapping.display_height.round() as u32).max(1);
    let crop = crop_resampled(image, view, dw, dh, Interpolation::Bilinear)
        .map_err(|e| ExportError::Render(e.to_string()))?;
    imageops::overlay(
        &mut frame,
        &crop,
        mapping.offset_x.round() as i64,
        mapping.offset_y.round() as i64,
    );
    Ok(frame)
}

/// `rect` (step source space) relative to the current `view`, in frame pixels.
fn view_to_frame(rect: Rect, view: Rect, mapping: &DisplayMapping) -> Rect {
    Rect::new(
        (rect.x - view.x) * mapping.scale + mapping.offset_x,
        (rect.y - view.y) * mapping.scale + mapping.offset_y,
        rect.w * mapping.scale,
        rect.h * mapping.scale,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::history::Description;
    use std::io::Cursor;
    use std::sync::Arc;

    fn step(w: u32, h: u32, shade: u8, selection: Option<Rect>) -> HistoryStep {
        HistoryStep {
            image: Arc::new(RgbaImage::from_fn(w, h, |x, y| {
                Rgba([shade, (x % 256) as u8, (y % 256) as u8, 255])
            })),
            description: selection.map(|_| Description::fallback()),
            selection,
        }
    }

    fn small_options() -> ExportOptions {
        ExportOptions {
            width: 64,
            height: 48,
            zoom_frames: 4,
            hold_frames: 2,
            fps: 20,
            max_colors: 32,
        }
    }

    fn count_frames(bytes: &[u8]) -> usize {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut decoder = options.read_info(Cursor::new(bytes)).unwrap();
        let mut n = 0;
        while decoder.read_next_frame().unwrap().is_some() {
            n += 1;
        }
        n
    }

    #[test]
    fn test_single_step_is_rejected() {
        let steps = vec![step(100, 100, 0, None)];
        assert!(matches!(
            export_zoom(&steps, &small_options()),
            Err(ExportError::TooFewSteps(1))
        ));
    }

    #[test]
    fn test_step_without_selection_aborts() {
        let steps = vec![step(100, 100, 0, None), step(50, 50, 10, None)];
        assert!(matches!(
            export_zoom(&steps, &small_options()),
            Err(ExportError::MissingSelection { index: 1 })
        ));
    }

    #[test]
    fn test_frame_count_and_header() {
        let steps = vec![
            step(200, 100, 0, None),
            step(128, 64, 80, Some(Rect::new(50.0, 25.0, 50.0, 25.0))),
            step(128, 64, 160, Some(Rect::new(0.0, 0.0, 64.0, 32.0))),
        ];
        let opts = small_options();
        let bytes = export_zoom(&steps, &opts).unwrap();
        assert_eq!(&bytes[..6], b"GIF89a");
        assert_eq!(count_frames(&bytes), 2 * opts.frames_per_step());
    }

    #[test]
    fn test_zoom_eases_from_full_extent_to_selection() {
        let steps = vec![
            step(200, 200, 0, None),
            step(64, 64, 80, Some(Rect::new(100.0, 100.0, 50.0, 50.0))),
        ];
        let opts = ExportOptions { zoom_frames: 5, ..small_options() };
        let specs = plan_frames(&steps, &opts).unwrap();
        let views: Vec<Rect> = specs
            .iter()
            .filter_map(|s| match s {
                FrameSpec::Zoom { view, .. } => Some(*view),
                FrameSpec::Hold { .. } => None,
            })
            .collect();
        assert_eq!(views.len(), 5);
        assert_eq!(views[0], Rect::new(0.0, 0.0, 200.0, 200.0));
        assert_eq!(views[4], Rect::new(100.0, 100.0, 50.0, 50.0));
        // Eased, not linear: the first quarter moves less than a linear ramp would.
        let linear_quarter_x = 100.0 * 0.25;
        assert!(views[1].x < linear_quarter_x);
        assert!(matches!(specs[5], FrameSpec::Hold { step: 1 }));
    }

    #[test]
    fn test_target_box_is_drawn_on_zoom_frames() {
        let steps = vec![
            step(64, 48, 0, None),
            step(32, 24, 80, Some(Rect::new(16.0, 12.0, 32.0, 24.0))),
        ];
        let frame = render_frame(
            &steps,
            FrameSpec::Zoom {
                step: 0,
                view: Rect::new(0.0, 0.0, 64.0, 48.0),
                target: Rect::new(16.0, 12.0, 32.0, 24.0),
            },
            Size::new(64.0, 48.0),
        )
        .unwrap();
        // Dash starts at the target's top-left corner.
        assert_eq!(*frame.get_pixel(16, 12), SELECTION_COLOR);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let steps = vec![
            step(10, 10, 0, None),
            step(10, 10, 1, Some(Rect::new(0.0, 0.0, 5.0, 5.0))),
        ];
        let opts = ExportOptions { width: 70_000, ..small_options() };
        assert!(matches!(export_zoom(&steps, &opts), Err(ExportError::FrameTooLarge { .. })));
    }
}
