//! Form Templates
//!
//! A template is the geometric description of one printed form layout,
//! produced by the layout tool as JSON. It is validated once on load and
//! never changed afterwards.

pub mod groups;

pub use groups::{build_groups, BubbleGroup, Discrepancy, ReadingPlan};

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{FieldError, TemplateError};
use crate::vision::bubble::BubbleReading;

/// Points awarded per correct answer when the template does not say
pub const DEFAULT_SCORE_PER_CORRECT: f64 = 5.0;

/// Answer key: question number to expected reading
pub type AnswerKey = BTreeMap<u32, BubbleReading>;

/// One answer circle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerBubble {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    /// 1-based question number
    pub question: u32,
    /// Option letter starting at 'A'
    pub option: char,
}

/// One student number circle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentIdBubble {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    /// 0-based digit column
    pub digit_position: u32,
    /// Digit this circle stands for (0-9)
    pub digit_value: u8,
}

/// Rectangle sent to text recognition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrArea {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub label: String,
}

/// Declared position of a printed alignment marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentCircle {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

/// Validated, immutable form template
#[derive(Debug, Clone, Serialize)]
pub struct Template {
    pub title: Option<String>,
    pub question_count: u32,
    pub option_count: u32,
    pub student_id_digits: u32,
    pub score_per_correct: f64,
    pub answer_bubbles: Vec<AnswerBubble>,
    pub student_id_bubbles: Vec<StudentIdBubble>,
    pub ocr_areas: Vec<OcrArea>,
    pub alignment_circles: Vec<AlignmentCircle>,
    pub answer_key: Option<AnswerKey>,
    /// Literal field values merged over OCR output, in document order
    pub ocr_overrides: Vec<(String, String)>,
}

impl Template {
    /// Parse and validate a template document
    pub fn from_json(json: &str) -> Result<Self, TemplateError> {
        let file: TemplateFile = serde_json::from_str(json)?;
        let template = file.validate()?;
        debug!(
            "Template parsed: {} questions x {} options, {} answer bubbles, {} id bubbles, {} OCR areas",
            template.question_count,
            template.option_count,
            template.answer_bubbles.len(),
            template.student_id_bubbles.len(),
            template.ocr_areas.len()
        );
        Ok(template)
    }

    /// Load a template from a JSON file
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let content = std::fs::read_to_string(path)?;
        let template = Self::from_json(&content)?;
        info!("Loaded template {:?} from {:?}", template.title, path);
        Ok(template)
    }

    /// Letters valid for this template, e.g. `['A', 'B', 'C', 'D']`
    pub fn option_letters(&self) -> impl Iterator<Item = char> {
        (0..self.option_count as u8).map(|i| (b'A' + i) as char)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TemplateFile {
    template_info: Option<TemplateInfoFile>,
    student_id_digits: Option<u32>,
    #[serde(default)]
    student_id_bubbles: Vec<StudentIdBubbleFile>,
    answer_bubbles: Option<Vec<AnswerBubbleFile>>,
    #[serde(default)]
    ocr_areas: Vec<OcrArea>,
    #[serde(default)]
    alignment_circles: Vec<AlignmentCircle>,
    answer_key: Option<OrderedMap>,
    ocr_overrides: Option<OrderedMap>,
}

#[derive(Debug, Deserialize)]
struct TemplateInfoFile {
    title: Option<String>,
    question_count: Option<u32>,
    option_count: Option<u32>,
    student_id_digits: Option<u32>,
    score_per_correct_answer: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AnswerBubbleFile {
    x: f64,
    y: f64,
    radius: f64,
    label: Option<String>,
    question: Option<u32>,
    option: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StudentIdBubbleFile {
    x: f64,
    y: f64,
    radius: f64,
    #[serde(alias = "digit_position")]
    digit: Option<u32>,
    digit_value: Option<u8>,
    label: Option<Value>,
}

/// JSON object kept in document order
#[derive(Debug, Default)]
struct OrderedMap(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for OrderedMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = OrderedMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// Render a scalar JSON value the way it would appear on the form
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl TemplateFile {
    fn validate(self) -> Result<Template, TemplateError> {
        let mut errors = Vec::new();

        let Some(info) = self.template_info else {
            return Err(TemplateError::Invalid(vec![FieldError::new("template_info", "missing")]));
        };

        let question_count = match info.question_count {
            Some(n) if n >= 1 => n,
            Some(_) => {
                errors.push(FieldError::new("template_info.question_count", "must be at least 1"));
                0
            }
            None => {
                errors.push(FieldError::new("template_info.question_count", "missing"));
                0
            }
        };

        let option_count = match info.option_count {
            Some(n) if (1..=26).contains(&n) => n,
            Some(n) => {
                errors.push(FieldError::new(
                    "template_info.option_count",
                    format!("must be between 1 and 26, got {}", n),
                ));
                0
            }
            None => {
                errors.push(FieldError::new("template_info.option_count", "missing"));
                0
            }
        };

        let score_per_correct = info.score_per_correct_answer.unwrap_or(DEFAULT_SCORE_PER_CORRECT);
        if !score_per_correct.is_finite() || score_per_correct < 0.0 {
            errors.push(FieldError::new(
                "template_info.score_per_correct_answer",
                "must be a non-negative number",
            ));
        }

        let answer_bubbles = match self.answer_bubbles {
            Some(raw) => validate_answer_bubbles(raw, question_count, option_count, &mut errors),
            None => {
                errors.push(FieldError::new("answer_bubbles", "missing"));
                Vec::new()
            }
        };

        let student_id_bubbles = validate_student_bubbles(self.student_id_bubbles, &mut errors);

        // column count falls back to the widest declared column
        let student_id_digits = self
            .student_id_digits
            .or(info.student_id_digits)
            .unwrap_or_else(|| {
                student_id_bubbles
                    .iter()
                    .map(|b| b.digit_position + 1)
                    .max()
                    .unwrap_or(0)
            });
        for (i, bubble) in student_id_bubbles.iter().enumerate() {
            if bubble.digit_position >= student_id_digits {
                errors.push(FieldError::new(
                    format!("student_id_bubbles[{}].digit", i),
                    format!(
                        "column {} outside of {} declared digits",
                        bubble.digit_position, student_id_digits
                    ),
                ));
            }
        }

        for (i, area) in self.ocr_areas.iter().enumerate() {
            if area.w == 0 || area.h == 0 {
                errors.push(FieldError::new(format!("ocr_areas[{}]", i), "width and height must be positive"));
            }
            if area.label.trim().is_empty() {
                errors.push(FieldError::new(format!("ocr_areas[{}].label", i), "must not be empty"));
            }
        }

        let answer_key = self
            .answer_key
            .map(|raw| validate_answer_key(raw, option_count, &mut errors));

        let ocr_overrides = self
            .ocr_overrides
            .unwrap_or_default()
            .0
            .into_iter()
            .map(|(key, value)| {
                let text = value_to_text(&value);
                (key, text)
            })
            .collect();

        if !errors.is_empty() {
            return Err(TemplateError::Invalid(errors));
        }

        Ok(Template {
            title: info.title,
            question_count,
            option_count,
            student_id_digits,
            score_per_correct,
            answer_bubbles,
            student_id_bubbles,
            ocr_areas: self.ocr_areas,
            alignment_circles: self.alignment_circles,
            answer_key,
            ocr_overrides,
        })
    }
}

fn check_geometry(field: &str, x: f64, y: f64, radius: f64, errors: &mut Vec<FieldError>) {
    if !x.is_finite() || !y.is_finite() {
        errors.push(FieldError::new(field, "coordinates must be finite"));
    }
    if !(radius.is_finite() && radius > 0.0) {
        errors.push(FieldError::new(format!("{}.radius", field), "must be positive"));
    }
}

fn validate_answer_bubbles(
    raw: Vec<AnswerBubbleFile>,
    question_count: u32,
    option_count: u32,
    errors: &mut Vec<FieldError>,
) -> Vec<AnswerBubble> {
    let mut bubbles = Vec::with_capacity(raw.len());

    for (i, bubble) in raw.into_iter().enumerate() {
        let field = format!("answer_bubbles[{}]", i);
        check_geometry(&field, bubble.x, bubble.y, bubble.radius, errors);

        // older layouts only carry the "<question>_<option>" label
        let from_label = bubble.label.as_deref().and_then(|label| label.split_once('_'));
        let question = bubble
            .question
            .or_else(|| from_label.and_then(|(q, _)| q.trim().parse().ok()));
        let option = bubble
            .option
            .as_deref()
            .or(from_label.map(|(_, o)| o))
            .and_then(single_char)
            .map(|c| c.to_ascii_uppercase());

        let question = match question {
            Some(q) if q >= 1 && q <= question_count => Some(q),
            Some(q) => {
                errors.push(FieldError::new(
                    format!("{}.question", field),
                    format!("{} outside of 1..={}", q, question_count),
                ));
                None
            }
            None => {
                errors.push(FieldError::new(format!("{}.question", field), "missing"));
                None
            }
        };

        let last_option = (b'A' + option_count.saturating_sub(1) as u8) as char;
        let option = match option {
            Some(o) if option_count > 0 && ('A'..=last_option).contains(&o) => Some(o),
            Some(o) => {
                errors.push(FieldError::new(
                    format!("{}.option", field),
                    format!("'{}' is not one of the first {} letters", o, option_count),
                ));
                None
            }
            None => {
                errors.push(FieldError::new(format!("{}.option", field), "missing"));
                None
            }
        };

        if let (Some(question), Some(option)) = (question, option) {
            bubbles.push(AnswerBubble {
                x: bubble.x,
                y: bubble.y,
                radius: bubble.radius,
                question,
                option,
            });
        }
    }

    bubbles
}

fn validate_student_bubbles(raw: Vec<StudentIdBubbleFile>, errors: &mut Vec<FieldError>) -> Vec<StudentIdBubble> {
    let mut bubbles = Vec::with_capacity(raw.len());
    let mut seen = HashSet::new();

    for (i, bubble) in raw.into_iter().enumerate() {
        let field = format!("student_id_bubbles[{}]", i);
        check_geometry(&field, bubble.x, bubble.y, bubble.radius, errors);

        let digit_value = bubble.digit_value.or_else(|| {
            bubble
                .label
                .as_ref()
                .and_then(|label| value_to_text(label).trim().parse::<u8>().ok())
        });
        let digit_value = match digit_value {
            Some(d) if d <= 9 => Some(d),
            Some(d) => {
                errors.push(FieldError::new(format!("{}.label", field), format!("{} is not a digit", d)));
                None
            }
            None => {
                errors.push(FieldError::new(format!("{}.label", field), "missing digit value"));
                None
            }
        };

        let Some(digit_position) = bubble.digit else {
            errors.push(FieldError::new(format!("{}.digit", field), "missing"));
            continue;
        };

        if let Some(digit_value) = digit_value {
            if !seen.insert((digit_position, digit_value)) {
                errors.push(FieldError::new(
                    format!("{}.label", field),
                    format!("digit {} repeated in column {}", digit_value, digit_position),
                ));
                continue;
            }
            bubbles.push(StudentIdBubble {
                x: bubble.x,
                y: bubble.y,
                radius: bubble.radius,
                digit_position,
                digit_value,
            });
        }
    }

    bubbles
}

fn validate_answer_key(raw: OrderedMap, option_count: u32, errors: &mut Vec<FieldError>) -> AnswerKey {
    let mut key = AnswerKey::new();
    let last_option = (b'A' + option_count.saturating_sub(1) as u8) as char;

    for (question, value) in raw.0 {
        let field = format!("answer_key.{}", question);
        let Ok(number) = question.trim().parse::<u32>() else {
            errors.push(FieldError::new(field, "key is not a question number"));
            continue;
        };

        match BubbleReading::try_from(value_to_text(&value)) {
            Ok(BubbleReading::Blank) => {
                key.insert(number, BubbleReading::Blank);
            }
            Ok(BubbleReading::Selected(c)) if ('A'..=last_option).contains(&c) => {
                key.insert(number, BubbleReading::Selected(c));
            }
            Ok(other) => errors.push(FieldError::new(
                field,
                format!("'{}' is not a valid option letter", other),
            )),
            Err(message) => errors.push(FieldError::new(field, message)),
        }
    }

    key
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Template with `questions x options` answer bubbles in a 40px grid,
    /// a 3-digit student number block and two OCR areas
    pub(crate) fn grid_template_json(questions: u32, options: u32, key: &str) -> String {
        let mut answers = Vec::new();
        for q in 1..=questions {
            for o in 0..options {
                let letter = (b'A' + o as u8) as char;
                answers.push(format!(
                    r#"{{"x": {}, "y": {}, "radius": 8, "label": "{}_{}", "question": {}, "option": "{}"}}"#,
                    300 + o * 40,
                    40 * q,
                    q,
                    letter,
                    q,
                    letter
                ));
            }
        }
        let mut ids = Vec::new();
        for col in 0..3 {
            for digit in 0..10 {
                ids.push(format!(
                    r#"{{"x": {}, "y": {}, "radius": 8, "label": "{}", "digit": {}}}"#,
                    40 + col * 40,
                    40 + digit * 30,
                    digit,
                    col
                ));
            }
        }
        format!(
            r#"{{
                "template_info": {{
                    "title": "Grid",
                    "question_count": {questions},
                    "option_count": {options},
                    "student_id_digits": 3,
                    "score_per_correct_answer": 5
                }},
                "student_id_digits": 3,
                "student_id_bubbles": [{ids}],
                "answer_bubbles": [{answers}],
                "ocr_areas": [
                    {{"x": 0, "y": 400, "w": 100, "h": 20, "label": "Ad Soyad", "type": "text"}},
                    {{"x": 100, "y": 400, "w": 60, "h": 20, "label": "Sınıf", "type": "text"}}
                ],
                "answer_key": {key},
                "ocr_overrides": {{"form_type": "Sınav Formu", "version": "1.0"}}
            }}"#,
            ids = ids.join(","),
            answers = answers.join(","),
        )
    }

    #[test]
    fn test_parse_layout_tool_output() {
        let template = Template::from_json(&grid_template_json(3, 4, r#"{"1": "A", "2": "B", "3": "-"}"#)).unwrap();

        assert_eq!(template.title.as_deref(), Some("Grid"));
        assert_eq!(template.question_count, 3);
        assert_eq!(template.option_count, 4);
        assert_eq!(template.student_id_digits, 3);
        assert_eq!(template.score_per_correct, 5.0);
        assert_eq!(template.answer_bubbles.len(), 12);
        assert_eq!(template.student_id_bubbles.len(), 30);
        assert_eq!(template.student_id_bubbles[13].digit_position, 1);
        assert_eq!(template.student_id_bubbles[13].digit_value, 3);
        assert_eq!(template.ocr_areas[1].label, "Sınıf");

        let key = template.answer_key.as_ref().unwrap();
        assert_eq!(key[&1], BubbleReading::Selected('A'));
        assert_eq!(key[&3], BubbleReading::Blank);

        assert_eq!(
            template.ocr_overrides,
            vec![
                ("form_type".to_string(), "Sınav Formu".to_string()),
                ("version".to_string(), "1.0".to_string()),
            ]
        );
        assert_eq!(template.option_letters().collect::<String>(), "ABCD");
    }

    #[test]
    fn test_question_and_option_from_label() {
        let json = r#"{
            "template_info": {"question_count": 2, "option_count": 2},
            "answer_bubbles": [
                {"x": 10, "y": 10, "radius": 5, "label": "2_b"}
            ]
        }"#;
        let template = Template::from_json(json).unwrap();
        assert_eq!(template.answer_bubbles[0].question, 2);
        assert_eq!(template.answer_bubbles[0].option, 'B');
        assert_eq!(template.score_per_correct, DEFAULT_SCORE_PER_CORRECT);
        assert!(template.answer_key.is_none());
        assert!(template.ocr_areas.is_empty());
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(matches!(Template::from_json("{ not json"), Err(TemplateError::Malformed(_))));
    }

    #[test]
    fn test_missing_geometry_is_rejected() {
        let json = r#"{"template_info": {"question_count": 2, "option_count": 4}}"#;
        let Err(TemplateError::Invalid(errors)) = Template::from_json(json) else {
            panic!("expected rejection");
        };
        assert!(errors.iter().any(|e| e.field == "answer_bubbles"));
    }

    #[test]
    fn test_every_bad_field_is_reported() {
        let json = r#"{
            "template_info": {"question_count": 2, "option_count": 3},
            "answer_bubbles": [
                {"x": 10, "y": 10, "radius": 5, "question": 3, "option": "A"},
                {"x": 10, "y": 10, "radius": 5, "question": 1, "option": "D"},
                {"x": 10, "y": 10, "radius": 0, "question": 1, "option": "A"}
            ],
            "answer_key": {"1": "Q"}
        }"#;
        let Err(TemplateError::Invalid(errors)) = Template::from_json(json) else {
            panic!("expected rejection");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"answer_bubbles[0].question"));
        assert!(fields.contains(&"answer_bubbles[1].option"));
        assert!(fields.contains(&"answer_bubbles[2].radius"));
        assert!(fields.contains(&"answer_key.1"));
    }

    #[test]
    fn test_student_digits_inferred_from_columns() {
        let json = r#"{
            "template_info": {"question_count": 1, "option_count": 2},
            "answer_bubbles": [],
            "student_id_bubbles": [
                {"x": 1, "y": 1, "radius": 2, "label": 0, "digit": 0},
                {"x": 1, "y": 1, "radius": 2, "label": "4", "digit": 1}
            ]
        }"#;
        let template = Template::from_json(json).unwrap();
        assert_eq!(template.student_id_digits, 2);
        assert_eq!(template.student_id_bubbles[1].digit_value, 4);
    }

    #[test]
    fn test_repeated_digit_in_column_is_rejected() {
        let json = r#"{
            "template_info": {"question_count": 1, "option_count": 2},
            "answer_bubbles": [],
            "student_id_bubbles": [
                {"x": 1, "y": 1, "radius": 2, "label": "3", "digit": 0},
                {"x": 1, "y": 5, "radius": 2, "label": "3", "digit": 0},
                {"x": 5, "y": 1, "radius": 2, "label": "3", "digit": 1}
            ]
        }"#;
        let Err(TemplateError::Invalid(errors)) = Template::from_json(json) else {
            panic!("expected rejection");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "student_id_bubbles[1].label");
        assert!(errors[0].message.contains("repeated in column 0"));
    }

    #[test]
    fn test_load_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), grid_template_json(2, 2, "{}")).unwrap();
        let template = Template::load(file.path()).unwrap();
        assert_eq!(template.answer_key.as_ref().map(|k| k.len()), Some(0));

        assert!(matches!(
            Template::load(Path::new("/nonexistent/template.json")),
            Err(TemplateError::Io(_))
        ));
    }
}
