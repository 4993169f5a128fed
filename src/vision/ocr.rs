//! OCR (Optical Character Recognition) module
//!
//! Text recognition is an external service behind [`TextRecognizer`]. The
//! bundled backend drives the Tesseract command line engine.

use async_trait::async_trait;
use image::GrayImage;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

use crate::config::{OcrBackend, OcrSettings};
use crate::error::OcrError;

/// External text recognition capability
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognize the text in a preprocessed greyscale crop
    async fn recognize_text(&self, image: &GrayImage, language_hint: &str) -> Result<String, OcrError>;
}

/// Build the recognizer selected by the configuration
pub fn recognizer_from_settings(settings: &OcrSettings) -> Box<dyn TextRecognizer> {
    match settings.backend {
        OcrBackend::Tesseract => Box::new(TesseractRecognizer::new(settings)),
        OcrBackend::Disabled => Box::new(DisabledRecognizer),
    }
}

/// Tesseract CLI backend
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    executable: PathBuf,
    page_segmentation_mode: u8,
}

impl TesseractRecognizer {
    pub fn new(settings: &OcrSettings) -> Self {
        Self {
            executable: settings
                .tesseract_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("tesseract")),
            page_segmentation_mode: settings.page_segmentation_mode,
        }
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize_text(&self, image: &GrayImage, language_hint: &str) -> Result<String, OcrError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(OcrError::Encode("empty OCR region".to_string()));
        }

        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png").map_err(|e| OcrError::Encode(e.to_string()))?;
        image
            .save(temp_input.path())
            .map_err(|e| OcrError::Encode(e.to_string()))?;

        let output = Command::new(&self.executable)
            .arg(temp_input.path())
            .arg("stdout")
            .arg("-l")
            .arg(language_hint)
            .arg("--psm")
            .arg(self.page_segmentation_mode.to_string())
            .output()
            .await
            .map_err(|e| OcrError::Spawn(format!("{}: {}", self.executable.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(stderr.trim().to_string()));
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        debug!("Tesseract returned {} bytes", text.len());
        Ok(text)
    }
}

/// Backend used when OCR is switched off; every call fails
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRecognizer;

#[async_trait]
impl TextRecognizer for DisabledRecognizer {
    async fn recognize_text(&self, _image: &GrayImage, _language_hint: &str) -> Result<String, OcrError> {
        Err(OcrError::Disabled)
    }
}
