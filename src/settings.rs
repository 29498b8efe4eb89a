use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::components::selection::SelectionMode;
use crate::error::SettingsError;
use crate::export::ExportOptions;
use crate::geometry::Size;

/// Which selection interaction the controller is built with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionModeSetting {
    #[default]
    Fixed,
    Drag,
}

impl std::str::FromStr for SelectionModeSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "drag" => Ok(Self::Drag),
            other => Err(format!("unknown selection mode '{}' (expected fixed or drag)", other)),
        }
    }
}

/// Engine settings that persist across sessions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Display container size in pixels
    pub viewport_width: f32,
    pub viewport_height: f32,

    // Selection
    pub selection_mode: SelectionModeSetting,
    /// Fixed-box size as a fraction of the image
    pub fixed_box_fraction: f32,
    /// Minimum drag width/height in display pixels
    pub min_drag_size: f32,

    // Pipeline
    pub new_selection_padding: f32,
    pub regenerate_padding: f32,
    /// Base working-crop width, scaled by (1 + padding)
    pub working_width: u32,
    /// Width of the committed crop
    pub output_width: u32,

    // Animation
    pub zoom_in_frames: u32,
    pub frame_rate: u32,
    pub dissolve_duration_ms: u32,

    pub export: ExportOptions,

    // Model service
    /// Base URL of the HTTP model service. Unset = local offline services.
    pub service_endpoint: Option<String>,
    /// Environment variable holding the bearer token
    pub service_api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            viewport_width: 1024.0,
            viewport_height: 768.0,
            selection_mode: SelectionModeSetting::Fixed,
            fixed_box_fraction: 0.125,
            min_drag_size: 10.0,
            new_selection_padding: 0.25,
            regenerate_padding: 0.5,
            working_width: 512,
            output_width: 1024,
            zoom_in_frames: 30,
            frame_rate: 60,
            dissolve_duration_ms: 1000,
            export: ExportOptions::default(),
            service_endpoint: None,
            service_api_key_env: "ENHANCE_API_KEY".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl EngineSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/enhance/enhance_settings.toml  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\Enhance\enhance_settings.toml
    /// On macOS:   ~/Library/Application Support/Enhance/enhance_settings.toml
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("enhance");
            return Some(config_dir.join("enhance_settings.toml"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("Enhance").join("enhance_settings.toml"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("Enhance")
                    .join("enhance_settings.toml"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe().ok().and_then(|p| p.parent().map(|d| d.join("enhance_settings.toml")))
        }
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        match Self::load_from(&path) {
            Ok(s) => s,
            Err(SettingsError::Io(_)) => Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "settings file ignored");
                Self::default()
            }
        }
    }

    /// Load from an explicit path. Missing keys take their defaults.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Write settings as TOML, creating the parent directory if needed.
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<(), SettingsError> {
        match Self::settings_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    pub fn viewport(&self) -> Size {
        Size::new(self.viewport_width.max(1.0), self.viewport_height.max(1.0))
    }

    /// The selection mode injected into the controller.
    pub fn selection_mode(&self) -> SelectionMode {
        match self.selection_mode {
            SelectionModeSetting::Fixed => SelectionMode::Fixed {
                size_fraction: self.fixed_box_fraction,
            },
            SelectionModeSetting::Drag => SelectionMode::Drag {
                min_size: self.min_drag_size,
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("enhance-settings-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_defaults() {
        let s = EngineSettings::default();
        assert_eq!(s.new_selection_padding, 0.25);
        assert_eq!(s.regenerate_padding, 0.5);
        assert_eq!(s.selection_mode(), SelectionMode::Fixed { size_fraction: 0.125 });
        assert!(s.service_endpoint.is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = temp_path("enhance_settings.toml");
        let mut s = EngineSettings::default();
        s.selection_mode = SelectionModeSetting::Drag;
        s.service_endpoint = Some("http://localhost:9000".to_string());
        s.export.hold_frames = 4;
        s.save_to(&path).unwrap();

        let loaded = EngineSettings::load_from(&path).unwrap();
        assert_eq!(loaded, s);
        assert_eq!(loaded.selection_mode(), SelectionMode::Drag { min_size: 10.0 });
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let s: EngineSettings = toml::from_str("selection_mode = \"drag\"\nworking_width = 256\n").unwrap();
        assert_eq!(s.selection_mode, SelectionModeSetting::Drag);
        assert_eq!(s.working_width, 256);
        assert_eq!(s.output_width, 1024);
        assert_eq!(s.export, ExportOptions::default());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let path = temp_path("bad.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "viewport_width = \"wide\"").unwrap();
        assert!(matches!(EngineSettings::load_from(&path), Err(SettingsError::Parse(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Drag".parse::<SelectionModeSetting>().unwrap(), SelectionModeSetting::Drag);
        assert!("lasso".parse::<SelectionModeSetting>().is_err());
    }
}
