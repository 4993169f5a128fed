//! Application Configuration
//!
//! User settings stored in TOML format. Bubble classification thresholds are
//! fixed policy and deliberately absent here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vision::corners::CornerDetectorConfig;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Live alignment and capture timing
    pub alignment: AlignmentSettings,
    /// Alignment marker detection
    pub corners: CornerDetectorConfig,
    /// Text recognition
    pub ocr: OcrSettings,
    /// Camera constraints
    pub camera: CameraSettings,
}

/// Alignment detection timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentSettings {
    /// Period of the corner detection tick
    pub scan_interval_ms: u64,
    /// Delay between reaching `aligned` and taking the capture
    pub settle_delay_ms: u64,
    /// Capture automatically once aligned
    pub auto_capture: bool,
    /// Upper bound on camera start-up
    pub acquire_timeout_ms: u64,
}

impl Default for AlignmentSettings {
    fn default() -> Self {
        Self {
            scan_interval_ms: 500,
            settle_delay_ms: 1000,
            auto_capture: true,
            acquire_timeout_ms: 10_000,
        }
    }
}

/// OCR backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackend {
    /// Tesseract command line engine
    #[default]
    Tesseract,
    /// No OCR; every text field reports as unreadable
    Disabled,
}

/// Text recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub backend: OcrBackend,
    /// Language hint passed to the engine (e.g. "tur+eng")
    pub language: String,
    /// Explicit engine executable; looked up on PATH when unset
    pub tesseract_path: Option<PathBuf>,
    /// Tesseract page segmentation mode
    pub page_segmentation_mode: u8,
    /// Label of the OCR area holding the full student name
    pub name_field_label: String,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            backend: OcrBackend::Tesseract,
            language: "tur+eng".to_string(),
            tesseract_path: None,
            page_segmentation_mode: 6,
            name_field_label: "Ad Soyad".to_string(),
        }
    }
}

/// Which way the camera should face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    /// Rear camera, pointed at the form
    #[default]
    Environment,
    /// Front camera
    User,
}

/// Camera constraints requested at acquisition time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing: CameraFacing,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            facing: CameraFacing::Environment,
        }
    }
}

/// Get the configuration directory, creating it if needed
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "omrtoolkit", "OmrToolkit")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {:?}", config_dir))?;

    Ok(config_dir)
}

/// Default location of `config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.alignment.scan_interval_ms, 500);
        assert_eq!(config.alignment.settle_delay_ms, 1000);
        assert!(config.alignment.auto_capture);

        assert_eq!(config.corners.stride, 10);
        assert_eq!(config.corners.max_corners, 4);
        assert!((config.corners.min_separation - 50.0).abs() < f64::EPSILON);

        assert_eq!(config.ocr.backend, OcrBackend::Tesseract);
        assert_eq!(config.ocr.language, "tur+eng");
        assert_eq!(config.ocr.name_field_label, "Ad Soyad");

        assert_eq!(config.camera.ideal_width, 1280);
        assert_eq!(config.camera.facing, CameraFacing::Environment);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.alignment.scan_interval_ms, parsed.alignment.scan_interval_ms);
        assert_eq!(config.corners.min_blue, parsed.corners.min_blue);
        assert_eq!(config.ocr.backend, parsed.ocr.backend);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig = toml::from_str(
            "[alignment]\nsettle_delay_ms = 800\n\n[ocr]\nbackend = \"disabled\"\n",
        )
        .unwrap();

        assert_eq!(parsed.alignment.settle_delay_ms, 800);
        assert_eq!(parsed.alignment.scan_interval_ms, 500);
        assert_eq!(parsed.ocr.backend, OcrBackend::Disabled);
        assert_eq!(parsed.ocr.language, "tur+eng");
        assert_eq!(parsed.corners.stride, 10);
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.alignment.auto_capture = false;
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert!(!loaded.alignment.auto_capture);
        assert_eq!(config.camera.ideal_height, loaded.camera.ideal_height);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
