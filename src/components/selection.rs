use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::components::history::ImageHandle;
use crate::error::EngineError;
use crate::geometry::{
    DisplayMapping, Point, Rect, Size, compute_display_mapping, compute_fixed_box, to_display_rect,
    to_source_rect,
};
use crate::ops::shapes::{LinePattern, SELECTION_COLOR, stroke_rect};
use crate::ops::transform::render_letterboxed;

/// How user input becomes a selection. Chosen once, at construction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SelectionMode {
    /// A single click yields a box of `size_fraction` of the image.
    Fixed { size_fraction: f32 },
    /// Press, drag, release; boxes not larger than `min_size` display px on
    /// both axes are discarded as accidental clicks.
    Drag { min_size: f32 },
}

/// A confirmed selection.
#[derive(Clone, Debug)]
pub struct SelectionOutput {
    /// Source-image pixels.
    pub source: Rect,
    /// Display-space rect, used to start the zoom-in animation.
    pub display: Rect,
    /// The display canvas with the selection box drawn in.
    pub snapshot: RgbaImage,
}

/// Turns clicks and drags into validated selections.
///
/// After a selection is produced the controller locks itself until the
/// orchestrator calls `unlock` (job committed or engine reset).
pub struct SelectionController {
    mode: SelectionMode,
    image: ImageHandle,
    container: Size,
    mapping: DisplayMapping,
    anchor: Option<Point>,
    in_progress: Option<Rect>,
    locked: bool,
}

impl SelectionController {
    pub fn new(mode: SelectionMode, image: ImageHandle, container: Size) -> Self {
        let mapping = compute_display_mapping(container, Size::of_image(&image));
        Self {
            mode,
            image,
            container,
            mapping,
            anchor: None,
            in_progress: None,
            locked: false,
        }
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn mapping(&self) -> &DisplayMapping {
        &self.mapping
    }

    pub fn container(&self) -> Size {
        self.container
    }

    /// Container resized; the mapping is recomputed and any drag is dropped.
    pub fn set_viewport(&mut self, container: Size) {
        self.container = container;
        self.remap();
    }

    /// The displayed image changed (new step, undo, redo).
    pub fn set_image(&mut self, image: ImageHandle) {
        self.image = image;
        self.remap();
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// The rubber-band rect currently being dragged (display space).
    pub fn in_progress(&self) -> Option<Rect> {
        self.in_progress
    }

    /// Fixed-box mode: a click at `point` (display space) selects a box.
    /// Ignored in drag mode, while locked, or outside the displayed image.
    pub fn click(&mut self, point: Point) -> Result<Option<SelectionOutput>, EngineError> {
        let SelectionMode::Fixed { size_fraction } = self.mode else {
            return Ok(None);
        };
        if self.locked || !self.mapping.image_rect().contains_point(point) {
            return Ok(None);
        }
        let source = compute_fixed_box(
            self.mapping.to_source_point(point),
            Size::of_image(&self.image),
            size_fraction,
        );
        self.finalize(source).map(Some)
    }

    pub fn pointer_down(&mut self, point: Point) {
        if self.locked || !matches!(self.mode, SelectionMode::Drag { .. }) {
            return;
        }
        self.anchor = Some(point);
        self.in_progress = Some(Rect::from_corners(point, point));
    }

    /// Returns the updated rubber-band rect while a drag is active.
    pub fn pointer_move(&mut self, point: Point) -> Option<Rect> {
        let anchor = self.anchor?;
        let rect = Rect::from_corners(anchor, point);
        self.in_progress = Some(rect);
        Some(rect)
    }

    /// Finish a drag. Too-small drags are discarded and yield `Ok(None)`.
    pub fn pointer_up(&mut self, point: Point) -> Result<Option<SelectionOutput>, EngineError> {
        let Some(anchor) = self.anchor.take() else {
            return Ok(None);
        };
        self.in_progress = None;
        let SelectionMode::Drag { min_size } = self.mode else {
            return Ok(None);
        };

        let Some(clipped) = intersect(Rect::from_corners(anchor, point), self.mapping.image_rect())
        else {
            return Ok(None);
        };
        if clipped.w <= min_size || clipped.h <= min_size {
            tracing::debug!(?clipped, min_size, "drag too small, discarded");
            return Ok(None);
        }
        let source = to_source_rect(clipped, &self.mapping);
        self.finalize(source).map(Some)
    }

    fn finalize(&mut self, source: Rect) -> Result<SelectionOutput, EngineError> {
        if source.is_degenerate() {
            return Err(EngineError::InvalidSelection(format!(
                "zero-area selection {:?}",
                source
            )));
        }
        let display = to_display_rect(source, &self.mapping);
        let mut snapshot = render_letterboxed(&self.image, self.container, &self.mapping);
        stroke_rect(&mut snapshot, display, 2, SELECTION_COLOR, LinePattern::Solid);
        self.locked = true;
        Ok(SelectionOutput {
            source,
            display,
            snapshot,
        })
    }

    fn remap(&mut self) {
        self.mapping = compute_display_mapping(self.container, Size::of_image(&self.image));
        self.anchor = None;
        self.in_progress = None;
    }
}

fn intersect(a: Rect, b: Rect) -> Option<Rect> {
    let x0 = a.x.max(b.x);
    let y0 = a.y.max(b.y);
    let x1 = a.right().min(b.right());
    let y1 = a.bottom().min(b.bottom());
    (x1 > x0 && y1 > y0).then(|| Rect::new(x0, y0, x1 - x0, y1 - y0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::sync::Arc;

    fn square(size: u32) -> ImageHandle {
        Arc::new(RgbaImage::from_pixel(size, size, Rgba([90, 120, 150, 255])))
    }

    fn fixed() -> SelectionController {
        // 1:1 container so display and source coordinates coincide.
        SelectionController::new(
            SelectionMode::Fixed { size_fraction: 0.125 },
            square(1000),
            Size::new(1000.0, 1000.0),
        )
    }

    #[test]
    fn test_fixed_click_centres_box() {
        let mut c = fixed();
        let out = c.click(Point::new(500.0, 500.0)).unwrap().unwrap();
        assert_eq!(out.source, Rect::new(437.5, 437.5, 125.0, 125.0));
        assert_eq!(out.display, out.source);
        assert_eq!(out.snapshot.dimensions(), (1000, 1000));
        assert_eq!(*out.snapshot.get_pixel(438, 438), SELECTION_COLOR);
    }

    #[test]
    fn test_fixed_click_near_edge_is_clamped() {
        let mut c = fixed();
        let out = c.click(Point::new(10.0, 10.0)).unwrap().unwrap();
        assert_eq!(out.source, Rect::new(0.0, 0.0, 125.0, 125.0));
    }

    #[test]
    fn test_controller_locks_after_selection() {
        let mut c = fixed();
        assert!(c.click(Point::new(500.0, 500.0)).unwrap().is_some());
        assert!(c.is_locked());
        assert!(c.click(Point::new(200.0, 200.0)).unwrap().is_none());
        c.unlock();
        assert!(c.click(Point::new(200.0, 200.0)).unwrap().is_some());
    }

    #[test]
    fn test_fixed_click_in_letterbox_bar_is_ignored() {
        let mut c = SelectionController::new(
            SelectionMode::Fixed { size_fraction: 0.1 },
            Arc::new(RgbaImage::new(200, 100)),
            Size::new(200.0, 200.0),
        );
        assert!(c.click(Point::new(100.0, 10.0)).unwrap().is_none());
        assert!(c.click(Point::new(100.0, 100.0)).unwrap().is_some());
    }

    #[test]
    fn test_drag_maps_through_letterbox() {
        // 400×200 image in a 200×200 container: scale 0.5, offset_y 50.
        let mut c = SelectionController::new(
            SelectionMode::Drag { min_size: 5.0 },
            Arc::new(RgbaImage::new(400, 200)),
            Size::new(200.0, 200.0),
        );
        c.pointer_down(Point::new(60.0, 110.0));
        assert_eq!(c.pointer_move(Point::new(20.0, 70.0)), Some(Rect::new(20.0, 70.0, 40.0, 40.0)));
        let out = c.pointer_up(Point::new(20.0, 70.0)).unwrap().unwrap();
        assert_eq!(out.display, Rect::new(20.0, 70.0, 40.0, 40.0));
        assert_eq!(out.source, Rect::new(40.0, 40.0, 80.0, 80.0));
        assert!(c.in_progress().is_none());
    }

    #[test]
    fn test_small_drag_is_discarded() {
        let mut c = SelectionController::new(
            SelectionMode::Drag { min_size: 10.0 },
            square(100),
            Size::new(100.0, 100.0),
        );
        c.pointer_down(Point::new(10.0, 10.0));
        c.pointer_move(Point::new(50.0, 15.0));
        assert!(c.pointer_up(Point::new(50.0, 15.0)).unwrap().is_none());
        assert!(!c.is_locked());
    }

    #[test]
    fn test_modes_do_not_mix() {
        let mut drag = SelectionController::new(
            SelectionMode::Drag { min_size: 1.0 },
            square(100),
            Size::new(100.0, 100.0),
        );
        assert!(drag.click(Point::new(50.0, 50.0)).unwrap().is_none());

        let mut fixed = fixed();
        fixed.pointer_down(Point::new(0.0, 0.0));
        assert!(fixed.pointer_move(Point::new(500.0, 500.0)).is_none());
        assert!(fixed.pointer_up(Point::new(500.0, 500.0)).unwrap().is_none());
    }

    #[test]
    fn test_drag_is_clipped_to_image() {
        let mut c = SelectionController::new(
            SelectionMode::Drag { min_size: 1.0 },
            square(100),
            Size::new(100.0, 100.0),
        );
        c.pointer_down(Point::new(-20.0, -20.0));
        let out = c.pointer_up(Point::new(30.0, 40.0)).unwrap().unwrap();
        assert_eq!(out.source, Rect::new(0.0, 0.0, 30.0, 40.0));
    }

    #[test]
    fn test_viewport_change_recomputes_mapping() {
        let mut c = fixed();
        c.set_viewport(Size::new(500.0, 500.0));
        assert_eq!(c.mapping().scale, 0.5);
        let out = c.click(Point::new(250.0, 250.0)).unwrap().unwrap();
        assert_eq!(out.source, Rect::new(437.5, 437.5, 125.0, 125.0));
        assert_eq!(out.display, Rect::new(218.75, 218.75, 62.5, 62.5));
    }
}
