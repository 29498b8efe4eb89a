use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

/// Shared, immutable raster handle passed between pipeline stages.
pub type ImageHandle = Arc<RgbaImage>;

/// Semantic summary of a selection, used only as cumulative context for the
/// enhancement service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub selection_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl Description {
    /// Generic stand-in used when the description service fails.
    pub fn fallback() -> Self {
        Self {
            selection_description: "a detailed region of the image".to_string(),
            prompt: Some("add fine detail, sharp focus".to_string()),
        }
    }
}

// ============================================================================
// HISTORY STEP
// ============================================================================

/// One committed state of the image.
#[derive(Clone, Debug)]
pub struct HistoryStep {
    pub image: ImageHandle,
    /// `None` only for the root step.
    pub description: Option<Description>,
    /// Rect in the *previous* step's source space that produced this step.
    /// `None` only for the root step.
    pub selection: Option<Rect>,
}

impl HistoryStep {
    pub fn root(image: ImageHandle) -> Self {
        Self {
            image,
            description: None,
            selection: None,
        }
    }

    pub fn memory_size(&self) -> usize {
        self.image.as_raw().len()
    }
}

// ============================================================================
// HISTORY STORE - linear undo stack with truncate-on-write
// ============================================================================

/// Ordered edit steps plus a cursor.
///
/// Invariants: never empty (step 0 is the loaded image) and
/// `0 <= index < len`. Committing while the cursor is behind the end drops
/// the redo branch.
#[derive(Clone, Debug)]
pub struct HistoryStore {
    steps: Vec<HistoryStep>,
    index: usize,
}

impl HistoryStore {
    pub fn new(root: ImageHandle) -> Self {
        Self {
            steps: vec![HistoryStep::root(root)],
            index: 0,
        }
    }

    /// Truncate to `[0..=index]`, append `step`, move the cursor onto it.
    pub fn commit_new_step(&mut self, step: HistoryStep) {
        self.steps.truncate(self.index + 1);
        self.steps.push(step);
        self.index = self.steps.len() - 1;
    }

    /// Overwrite the step under the cursor; length and other steps are untouched.
    pub fn replace_current_step(&mut self, step: HistoryStep) {
        self.steps[self.index] = step;
    }

    /// Returns `true` if the cursor moved.
    pub fn undo(&mut self) -> bool {
        if self.index > 0 {
            self.index -= 1;
            true
        } else {
            false
        }
    }

    /// Returns `true` if the cursor moved.
    pub fn redo(&mut self) -> bool {
        if self.index + 1 < self.steps.len() {
            self.index += 1;
            true
        } else {
            false
        }
    }

    /// Replace everything with a single root step.
    pub fn reset(&mut self, root: ImageHandle) {
        self.steps.clear();
        self.steps.push(HistoryStep::root(root));
        self.index = 0;
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.steps.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn current(&self) -> &HistoryStep {
        &self.steps[self.index]
    }

    pub fn steps(&self) -> &[HistoryStep] {
        &self.steps
    }

    /// Steps from the root up to and including the cursor.
    pub fn path_to_cursor(&self) -> &[HistoryStep] {
        &self.steps[..=self.index]
    }

    /// Descriptions of `steps[..end]` in order, skipping the root.
    pub fn descriptions_before(&self, end: usize) -> Vec<Description> {
        self.steps[..end.min(self.steps.len())]
            .iter()
            .filter_map(|s| s.description.clone())
            .collect()
    }

    /// Total raster bytes held by all steps.
    pub fn memory_usage(&self) -> usize {
        self.steps.iter().map(HistoryStep::memory_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn img(tag: u8) -> ImageHandle {
        Arc::new(RgbaImage::from_pixel(2, 2, Rgba([tag, tag, tag, 255])))
    }

    fn step(tag: u8) -> HistoryStep {
        HistoryStep {
            image: img(tag),
            description: Some(Description {
                selection_description: format!("step {}", tag),
                prompt: Some(format!("prompt {}", tag)),
            }),
            selection: Some(Rect::new(0.0, 0.0, 1.0, 1.0)),
        }
    }

    fn tag_of(s: &HistoryStep) -> u8 {
        s.image.get_pixel(0, 0)[0]
    }

    #[test]
    fn test_new_history_has_root_only() {
        let h = HistoryStore::new(img(0));
        assert_eq!(h.len(), 1);
        assert_eq!(h.index(), 0);
        assert!(h.current().selection.is_none());
        assert!(!h.can_undo());
        assert!(!h.can_redo());
    }

    #[test]
    fn test_commit_from_cursor_two_of_five_drops_former_three_and_four() {
        let mut h = HistoryStore::new(img(0));
        for t in 1..=4 {
            h.commit_new_step(step(t));
        }
        h.undo();
        h.undo();
        assert_eq!((h.len(), h.index()), (5, 2));

        h.commit_new_step(step(8));
        let tags: Vec<u8> = h.steps().iter().map(tag_of).collect();
        assert_eq!(tags, vec![0, 1, 2, 8]);
        assert_eq!(h.index(), 3);
        assert!(!h.can_redo());
    }

    #[test]
    fn test_undo_then_select_replaces_branch() {
        // [root, A] at 1 -> commit B -> undo -> commit C => [root, A, C]
        let mut h = HistoryStore::new(img(0));
        h.commit_new_step(step(1));
        h.commit_new_step(step(2));
        assert_eq!((h.len(), h.index()), (3, 2));
        h.undo();
        assert_eq!(tag_of(h.current()), 1);
        h.commit_new_step(step(3));
        let tags: Vec<u8> = h.steps().iter().map(tag_of).collect();
        assert_eq!(tags, vec![0, 1, 3]);
    }

    #[test]
    fn test_undo_redo_bounds() {
        let mut h = HistoryStore::new(img(0));
        assert!(!h.undo());
        h.commit_new_step(step(1));
        assert!(!h.redo());
        assert!(h.undo());
        assert_eq!(h.index(), 0);
        assert!(h.redo());
        assert_eq!(h.index(), 1);
        assert!(!h.redo());
    }

    #[test]
    fn test_replace_keeps_length_and_neighbours() {
        let mut h = HistoryStore::new(img(0));
        h.commit_new_step(step(1));
        h.commit_new_step(step(2));
        h.undo();
        let before: Vec<ImageHandle> = h.steps().iter().map(|s| s.image.clone()).collect();

        h.replace_current_step(step(5));
        assert_eq!(h.len(), 3);
        assert_eq!(h.index(), 1);
        assert_eq!(tag_of(h.current()), 5);
        assert!(Arc::ptr_eq(&h.steps()[0].image, &before[0]));
        assert!(Arc::ptr_eq(&h.steps()[2].image, &before[2]));
    }

    #[test]
    fn test_reset_discards_everything() {
        let mut h = HistoryStore::new(img(0));
        h.commit_new_step(step(1));
        h.reset(img(3));
        assert_eq!(h.len(), 1);
        assert_eq!(h.index(), 0);
        assert_eq!(tag_of(h.current()), 3);
    }

    #[test]
    fn test_descriptions_before_skips_root() {
        let mut h = HistoryStore::new(img(0));
        h.commit_new_step(step(1));
        h.commit_new_step(step(2));
        let d = h.descriptions_before(2);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].selection_description, "step 1");
        assert_eq!(h.descriptions_before(10).len(), 2);
    }

    #[test]
    fn test_path_to_cursor() {
        let mut h = HistoryStore::new(img(0));
        h.commit_new_step(step(1));
        h.commit_new_step(step(2));
        h.undo();
        assert_eq!(h.path_to_cursor().len(), 2);
        assert_eq!(h.memory_usage(), 3 * 16);
    }
}
