//! Error types shared across the recognition pipeline

use thiserror::Error;

/// Reasons a camera stream could not be acquired
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    /// The user or platform refused camera access
    #[error("camera access denied")]
    PermissionDenied,

    /// No capture device is present
    #[error("no camera device found")]
    NoDevice,

    /// The device exists but another consumer holds it
    #[error("camera is in use by another application")]
    DeviceBusy,

    /// The requested resolution or facing mode is not available
    #[error("camera does not support the requested constraints: {0}")]
    UnsupportedConstraints(String),

    /// Acquisition did not complete in time
    #[error("camera did not start within {0} ms")]
    Timeout(u64),

    /// The stream opened but could not deliver frames
    #[error("camera stream failed: {0}")]
    Stream(String),
}

impl AcquisitionError {
    /// Stable reason code for the consuming layer
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::NoDevice => "no_device",
            Self::DeviceBusy => "device_busy",
            Self::UnsupportedConstraints(_) => "unsupported_constraints",
            Self::Timeout(_) => "timeout",
            Self::Stream(_) => "stream",
        }
    }
}

/// A single problem found while validating a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Path of the offending field, e.g. `answer_bubbles[3].option`
    pub field: String,
    /// Human readable description
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Template loading errors. A template is either accepted whole or rejected.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// The document is not valid JSON or does not match the schema
    #[error("malformed template JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The document parsed but one or more fields are invalid
    #[error("template rejected: {}", join_fields(.0))]
    Invalid(Vec<FieldError>),

    /// The template file could not be read
    #[error("failed to read template: {0}")]
    Io(#[from] std::io::Error),
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures of the external text recognition service
#[derive(Error, Debug)]
pub enum OcrError {
    /// The OCR engine could not be started
    #[error("failed to launch OCR engine: {0}")]
    Spawn(String),

    /// The engine ran but reported an error
    #[error("OCR engine failed: {0}")]
    Engine(String),

    /// The cropped image could not be handed to the engine
    #[error("failed to encode OCR input: {0}")]
    Encode(String),

    /// OCR is switched off in the configuration
    #[error("OCR backend is disabled")]
    Disabled,
}

/// Top-level pipeline error
#[derive(Error, Debug)]
pub enum OmrError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Another recognition call already owns this frame
    #[error("recognition already in progress for frame {0}")]
    RecognitionInProgress(uuid::Uuid),

    /// The capture session was stopped before a frame was taken
    #[error("capture session cancelled")]
    SessionCancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
