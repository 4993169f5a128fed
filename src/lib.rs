//! OMR Toolkit - bubble sheet recognition and scoring
//!
//! Reads filled-in answer forms from camera frames or image files, using a
//! JSON template that describes where bubbles and text fields are printed.

pub mod alignment;
pub mod analysis;
pub mod app;
pub mod capture;
pub mod config;
pub mod error;
pub mod shared;
pub mod template;
pub mod vision;

pub use app::{KeyMode, KeySource, OmrApp, OmrReport};
pub use error::{AcquisitionError, OcrError, OmrError, TemplateError};
