//! Form recognition
//!
//! Reads one captured form against its template: OCR text fields first, then
//! the student number columns, then the answer groups.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bubble::{BubbleClassifier, BubbleReading};
use super::ocr::TextRecognizer;
use super::ocr_preprocess::prepare_ocr_area;
use crate::capture::frame::CapturedFrame;
use crate::config::OcrSettings;
use crate::error::OmrError;
use crate::template::{build_groups, AnswerKey, Discrepancy, ReadingPlan, Template};

/// Text stored for a field the OCR engine could not read
pub const UNREADABLE: &str = "unreadable";

/// Student number reported when the template has no student number block
pub const NO_STUDENT_ID: &str = "-";

/// Letters kept in names besides ASCII word characters
const TURKISH_LETTERS: &str = "ĞÜŞİÖÇğüşıöç";

/// Label fragments marking a class field
const CLASS_LABEL_MARKERS: [&str; 3] = ["sınıf", "sinif", "class"];

/// Where a field's text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Ocr,
    Override,
    /// OCR failed; the text is the placeholder
    Failed,
}

/// One labelled text field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OcrField {
    pub label: String,
    pub text: String,
    pub source: FieldSource,
    /// Set when this field could not be recognized
    pub warning: Option<String>,
}

/// Text fields of a form plus the student details derived from them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OcrResult {
    /// Fields in template order, with override-only fields appended
    pub fields: Vec<OcrField>,
    pub name: String,
    pub surname: String,
    pub class_name: String,
}

impl OcrResult {
    /// Text of the field labelled `label`
    pub fn get(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.label == label)
            .map(|f| f.text.as_str())
    }

    /// `(label, warning)` for every failed field
    pub fn warnings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter_map(|f| f.warning.as_deref().map(|w| (f.label.as_str(), w)))
    }

    /// Insert or overwrite a field, keeping the position of an existing label
    fn set(&mut self, label: &str, text: String, source: FieldSource, warning: Option<String>) {
        let field = OcrField {
            label: label.to_string(),
            text,
            source,
            warning,
        };
        match self.fields.iter_mut().find(|f| f.label == label) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }
}

/// Everything read from one form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub student_id: String,
    pub student_answers: BTreeMap<u32, BubbleReading>,
    pub ocr: OcrResult,
    /// Template problems noticed while building the reading plan
    pub discrepancies: Vec<Discrepancy>,
}

/// Corrections entered by a human reviewer
#[derive(Debug, Clone, Default)]
pub struct ReviewEdit {
    pub student_id: Option<String>,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub class_name: Option<String>,
}

impl RecognitionResult {
    /// Copy of this result with the reviewer's corrections applied
    pub fn apply_review(&self, edit: &ReviewEdit) -> Self {
        let mut edited = self.clone();
        if let Some(id) = &edit.student_id {
            edited.student_id = id.clone();
        }
        if let Some(name) = &edit.name {
            edited.ocr.name = name.clone();
        }
        if let Some(surname) = &edit.surname {
            edited.ocr.surname = surname.clone();
        }
        if let Some(class_name) = &edit.class_name {
            edited.ocr.class_name = class_name.clone();
            for field in edited.ocr.fields.iter_mut().filter(|f| is_class_label(&f.label)) {
                field.text = class_name.clone();
                field.warning = None;
            }
        }
        edited
    }
}

/// Recognizer settings taken from the OCR configuration
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// Language hint passed with every OCR call
    pub language: String,
    /// Label of the full-name field, compared case-insensitively
    pub name_field_label: String,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self::from(&OcrSettings::default())
    }
}

impl From<&OcrSettings> for RecognizerConfig {
    fn from(settings: &OcrSettings) -> Self {
        Self {
            language: settings.language.clone(),
            name_field_label: settings.name_field_label.clone(),
        }
    }
}

/// Reads forms; at most one recognition per frame runs at a time
pub struct FormRecognizer {
    classifier: BubbleClassifier,
    config: RecognizerConfig,
    in_flight: Mutex<HashSet<Uuid>>,
}

/// Releases a frame claim when recognition ends
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

impl FormRecognizer {
    pub fn new() -> Self {
        Self::with_config(RecognizerConfig::default())
    }

    pub fn with_config(config: RecognizerConfig) -> Self {
        Self {
            classifier: BubbleClassifier::new(),
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, id: Uuid) -> Result<InFlightGuard<'_>, OmrError> {
        if !self.in_flight.lock().insert(id) {
            return Err(OmrError::RecognitionInProgress(id));
        }
        Ok(InFlightGuard {
            set: &self.in_flight,
            id,
        })
    }

    /// Read text fields, student number and answers from `frame`
    pub async fn recognize(
        &self,
        frame: &CapturedFrame,
        template: &Template,
        ocr: &dyn TextRecognizer,
    ) -> Result<RecognitionResult, OmrError> {
        let _guard = self.claim(frame.id())?;
        let start = Instant::now();
        info!("Recognizing frame {} ({}x{})", frame.id(), frame.width, frame.height);

        let plan = build_groups(template);
        let ocr_result = self.read_text_fields(frame, template, ocr).await;

        let student_id = if template.student_id_bubbles.is_empty() {
            warn!("Template declares no student number bubbles");
            NO_STUDENT_ID.to_string()
        } else {
            let id = self.read_student_id(frame, &plan);
            info!("Student number: {}", id);
            id
        };

        let student_answers = if template.answer_bubbles.is_empty() {
            warn!("Template declares no answer bubbles");
            BTreeMap::new()
        } else {
            self.read_answers(frame, &plan)
        };

        debug!(
            "Recognition of frame {} finished in {:?}: {} answers, {} text fields",
            frame.id(),
            start.elapsed(),
            student_answers.len(),
            ocr_result.fields.len()
        );

        Ok(RecognitionResult {
            student_id,
            student_answers,
            ocr: ocr_result,
            discrepancies: plan.discrepancies,
        })
    }

    /// OCR every declared area in order, then merge overrides and derive names
    ///
    /// Areas are processed one after another so the merged field order is
    /// deterministic. A failing area gets the placeholder text and a warning;
    /// the remaining areas are still read.
    pub async fn read_text_fields(
        &self,
        frame: &CapturedFrame,
        template: &Template,
        ocr: &dyn TextRecognizer,
    ) -> OcrResult {
        let mut result = OcrResult::default();

        for area in &template.ocr_areas {
            debug!("Reading OCR area '{}'", area.label);
            let image = prepare_ocr_area(frame, area);
            match ocr.recognize_text(&image, &self.config.language).await {
                Ok(text) => {
                    let text = text.trim().to_string();
                    info!("OCR '{}': {:?}", area.label, text);
                    result.set(&area.label, text, FieldSource::Ocr, None);
                }
                Err(e) => {
                    warn!("OCR failed for '{}': {}", area.label, e);
                    result.set(
                        &area.label,
                        UNREADABLE.to_string(),
                        FieldSource::Failed,
                        Some(e.to_string()),
                    );
                }
            }
        }

        for (label, value) in &template.ocr_overrides {
            debug!("OCR override '{}' = {:?}", label, value);
            result.set(label, value.clone(), FieldSource::Override, None);
        }

        let name_label = self.config.name_field_label.to_lowercase();
        if let Some(full_name) = result
            .fields
            .iter()
            .find(|f| f.label.to_lowercase() == name_label)
            .map(|f| f.text.clone())
        {
            let (name, surname) = split_full_name(&full_name);
            result.name = name;
            result.surname = surname;
        }

        if let Some(class_field) = result.fields.iter().find(|f| is_class_label(&f.label)) {
            result.class_name = class_field.text.clone();
            debug!("Class from '{}': {:?}", class_field.label, result.class_name);
        }

        result
    }

    /// One character per student number column
    pub fn read_student_id(&self, frame: &CapturedFrame, plan: &ReadingPlan) -> String {
        plan.student_id_groups
            .iter()
            .map(|group| self.classifier.read_group(frame, &group.members).symbol())
            .collect()
    }

    /// Reading for every question that has bubbles
    pub fn read_answers(&self, frame: &CapturedFrame, plan: &ReadingPlan) -> BTreeMap<u32, BubbleReading> {
        plan.answer_groups
            .iter()
            .map(|group| (group.key, self.classifier.read_group(frame, &group.members)))
            .collect()
    }

    /// Read the answer bubbles of a filled-in key form
    pub fn read_answer_key(&self, frame: &CapturedFrame, template: &Template) -> AnswerKey {
        let plan = build_groups(template);
        let key = self.read_answers(frame, &plan);
        info!("Read answer key form: {} questions", key.len());
        key
    }
}

impl Default for FormRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_class_label(label: &str) -> bool {
    let lower = label.to_lowercase();
    CLASS_LABEL_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Split a full name into `(name, surname)`
///
/// Punctuation becomes whitespace; ASCII word characters and Turkish letters
/// are kept. The first token is the name and the rest, joined by single
/// spaces, the surname.
pub fn split_full_name(full_name: &str) -> (String, String) {
    if full_name == UNREADABLE {
        return (String::new(), String::new());
    }

    let cleaned: String = full_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c.is_whitespace() || TURKISH_LETTERS.contains(c) {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut parts = cleaned.split_whitespace();
    let name = parts.next().unwrap_or_default().to_string();
    let surname = parts.collect::<Vec<_>>().join(" ");
    (name, surname)
}
