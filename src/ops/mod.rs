// ============================================================================
// OPS — raster operations and the model-service seam
// ============================================================================
//
//   transform.rs — fractional-rect crops, resampling, pixelated previews
//   shapes.rs    — solid / dashed rectangle outlines
//   ai.rs        — description + enhancement service traits, offline services
//   http.rs      — HTTP client for a remote model service
// ============================================================================

pub mod ai;
pub mod http;
pub mod shapes;
pub mod transform;
