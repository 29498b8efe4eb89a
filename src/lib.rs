#![allow(clippy::too_many_arguments)]

pub mod animation;
pub mod cli;
pub mod components;
pub mod error;
pub mod export;
pub mod geometry;
pub mod io;
pub mod logger;
pub mod ops;
pub mod orchestrator;
pub mod settings;

pub use error::{EngineError, ExportError, ServiceError, SettingsError};
pub use orchestrator::{EnhancementReport, Outcome, RefineState, Refiner};
pub use settings::EngineSettings;
