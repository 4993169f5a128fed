//! Vision Layer
//!
//! Pixel-level reading of captured forms:
//! - bubble fill classification and group reading
//! - corner marker detection for alignment
//! - OCR area preprocessing and the external text recognizer seam
//! - the form recognizer that ties them to a template

pub mod bubble;
pub mod corners;
pub mod ocr;
pub mod ocr_preprocess;
pub mod recognizer;

pub use bubble::{BubbleClassifier, BubbleReading, GroupMember};
pub use corners::{Corner, CornerDetector, CornerDetectorConfig};
pub use ocr::{recognizer_from_settings, DisabledRecognizer, TesseractRecognizer, TextRecognizer};
pub use ocr_preprocess::{prepare_ocr_area, preprocess_for_ocr};
pub use recognizer::{
    FieldSource, FormRecognizer, OcrField, OcrResult, RecognitionResult, RecognizerConfig, ReviewEdit,
};
