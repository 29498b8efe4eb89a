// ============================================================================
// COMPONENTS — stateful pieces of the refinement engine
// ============================================================================
//
//   history.rs   — linear step history with a cursor
//   selection.rs — click / drag input to validated selections
//   dissolve.rs  — randomized per-pixel reveal
// ============================================================================

pub mod dissolve;
pub mod history;
pub mod selection;
