// ============================================================================
// ERRORS — engine, service, export and settings failure taxonomy
// ============================================================================

use thiserror::Error;

use crate::orchestrator::RefineState;

/// Errors surfaced by the refinement engine's entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An entry point was called while a job, reveal or load was in progress.
    /// The call had no effect.
    #[error("engine is busy ({state:?}); request ignored")]
    Busy { state: RefineState },
    #[error("no image is loaded")]
    NoImage,
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error("the root step cannot be regenerated")]
    NothingToRegenerate,
    #[error("no enhancement job or result is pending")]
    NoJob,
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("raster operation failed: {0}")]
    Raster(String),
    #[error("dissolve setup failed: {0}")]
    Dissolve(String),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("state serialization failed: {0}")]
    State(#[from] serde_json::Error),
}

/// Errors returned by the external description / enhancement services.
/// These never escape the orchestrator; they are degraded into fallbacks.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("image payload error: {0}")]
    Image(#[from] image::ImageError),
    #[error("base64 payload error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Errors that abort a zoom export. No partial output is ever returned.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("zoom export needs at least 2 history steps, got {0}")]
    TooFewSteps(usize),
    #[error("frame size {width}×{height} exceeds the GIF maximum (65535×65535)")]
    FrameTooLarge { width: u32, height: u32 },
    #[error("no frames to encode")]
    NoFrames,
    #[error("frame is {got:?}, expected {expected:?} like the first frame")]
    FrameSizeMismatch { expected: (u32, u32), got: (u32, u32) },
    #[error("step {index} has no selection to zoom into")]
    MissingSelection { index: usize },
    #[error("frame rendering failed: {0}")]
    Render(String),
    #[error("GIF encoding failed: {0}")]
    Encode(#[from] gif::EncodingError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reading or writing the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}
