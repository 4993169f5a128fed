//! Per-run session context

use std::sync::Arc;
use tracing::debug;

use crate::capture::CapturedFrame;
use crate::template::Template;
use crate::vision::recognizer::RecognitionResult;

/// State of one recognition run: template, current frame and accumulated result
///
/// Owned by the run that created it. The template is shared read-only with
/// other runs.
#[derive(Debug, Clone)]
pub struct SessionContext {
    template: Arc<Template>,
    frame: Option<CapturedFrame>,
    recognition: Option<RecognitionResult>,
    warnings: Vec<String>,
}

impl SessionContext {
    pub fn new(template: Arc<Template>) -> Self {
        Self {
            template,
            frame: None,
            recognition: None,
            warnings: Vec::new(),
        }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn shared_template(&self) -> Arc<Template> {
        Arc::clone(&self.template)
    }

    pub fn frame(&self) -> Option<&CapturedFrame> {
        self.frame.as_ref()
    }

    /// Replace the current frame; a recognition of the previous frame is dropped
    pub fn set_frame(&mut self, frame: CapturedFrame) {
        if self.recognition.take().is_some() {
            debug!("New frame {} replaces a recognized frame", frame.id());
        }
        self.frame = Some(frame);
    }

    pub fn recognition(&self) -> Option<&RecognitionResult> {
        self.recognition.as_ref()
    }

    /// Store a recognition result and collect its warnings
    pub fn set_recognition(&mut self, result: RecognitionResult) {
        for discrepancy in &result.discrepancies {
            self.warnings.push(discrepancy.to_string());
        }
        for (label, warning) in result.ocr.warnings() {
            self.warnings.push(format!("OCR failed for '{}': {}", label, warning));
        }
        if self.template.student_id_bubbles.is_empty() {
            self.warnings
                .push("Template has no student number bubbles; student number not read".to_string());
        }
        self.recognition = Some(result);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Consume the context, returning the result and all warnings
    pub fn finish(self) -> (Option<RecognitionResult>, Vec<String>) {
        (self.recognition, self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Discrepancy;
    use crate::vision::recognizer::{FieldSource, OcrField, OcrResult};
    use std::collections::BTreeMap;

    fn template(json: &str) -> Arc<Template> {
        Arc::new(Template::from_json(json).unwrap())
    }

    fn minimal() -> Arc<Template> {
        template(r#"{"template_info": {"question_count": 2, "option_count": 2}, "answer_bubbles": []}"#)
    }

    fn result() -> RecognitionResult {
        RecognitionResult {
            student_id: "-".into(),
            student_answers: BTreeMap::new(),
            ocr: OcrResult {
                fields: vec![OcrField {
                    label: "Ad Soyad".into(),
                    text: "unreadable".into(),
                    source: FieldSource::Failed,
                    warning: Some("engine exited with status 1".into()),
                }],
                ..Default::default()
            },
            discrepancies: vec![Discrepancy::QuestionWithoutBubbles { question: 2 }],
        }
    }

    #[test]
    fn test_recognition_warnings_are_collected() {
        let mut ctx = SessionContext::new(minimal());
        ctx.set_frame(CapturedFrame::new(vec![255; 4], 1, 1));
        ctx.set_recognition(result());

        let warnings = ctx.warnings();
        assert_eq!(warnings.len(), 3);
        assert!(warnings[1].contains("Ad Soyad"));
        assert!(warnings[2].contains("student number"));
    }

    #[test]
    fn test_new_frame_drops_stale_recognition() {
        let mut ctx = SessionContext::new(minimal());
        ctx.set_frame(CapturedFrame::new(vec![255; 4], 1, 1));
        ctx.set_recognition(result());
        assert!(ctx.recognition().is_some());

        let next = CapturedFrame::new(vec![0; 4], 1, 1);
        let next_id = next.id();
        ctx.set_frame(next);
        assert!(ctx.recognition().is_none());
        assert_eq!(ctx.frame().map(|f| f.id()), Some(next_id));
    }

    #[test]
    fn test_finish_returns_everything() {
        let mut ctx = SessionContext::new(minimal());
        ctx.warn("self key");
        ctx.set_recognition(result());
        let (recognition, warnings) = ctx.finish();
        assert_eq!(recognition.unwrap().student_id, "-");
        assert_eq!(warnings[0], "self key");
    }
}
