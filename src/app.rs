//! Application Coordinator
//!
//! Runs the pipeline end to end: capture a frame, recognize it against a
//! template, resolve the answer key and score.

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::alignment::{AlignmentStatus, CaptureSession};
use crate::analysis::{score, QuestionDetail, ScoreStats};
use crate::capture::{self, Camera, CapturedFrame};
use crate::config::AppConfig;
use crate::shared::{SessionContext, SessionEvent};
use crate::template::{AnswerKey, Template};
use crate::vision::{
    recognizer_from_settings, Corner, CornerDetector, FormRecognizer, RecognitionResult, RecognizerConfig,
    TextRecognizer,
};

/// Where the answer key comes from
#[derive(Debug, Clone, Copy)]
pub enum KeySource<'a> {
    /// The key embedded in the template
    Template,
    /// A filled-in key form read with the same template
    Form(&'a CapturedFrame),
    /// The student form is its own key
    SelfKey,
}

/// Serialisable tag of the key source used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    Template,
    Form,
    SelfKey,
}

/// Complete outcome of processing one form
#[derive(Debug, Clone, Serialize)]
pub struct OmrReport {
    pub recognition: RecognitionResult,
    pub answer_key: AnswerKey,
    pub key_mode: KeyMode,
    /// Every answer is compared with itself; the score carries no information
    pub self_key: bool,
    pub stats: ScoreStats,
    pub details: Vec<QuestionDetail>,
    pub warnings: Vec<String>,
}

/// Main application coordinator
pub struct OmrApp {
    config: AppConfig,
    recognizer: FormRecognizer,
    ocr: Box<dyn TextRecognizer>,
    events: Option<Sender<SessionEvent>>,
}

impl OmrApp {
    /// Create a coordinator using the configured OCR backend
    pub fn new(config: AppConfig) -> Self {
        let ocr = recognizer_from_settings(&config.ocr);
        Self::with_text_recognizer(config, ocr)
    }

    pub fn with_text_recognizer(config: AppConfig, ocr: Box<dyn TextRecognizer>) -> Self {
        let recognizer = FormRecognizer::with_config(RecognizerConfig::from(&config.ocr));
        Self {
            config,
            recognizer,
            ocr,
            events: None,
        }
    }

    /// Forward capture session events to `events`
    pub fn with_events(mut self, events: Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn corner_detector(&self) -> CornerDetector {
        CornerDetector::with_config(self.config.corners.clone())
    }

    /// Corners in one frame and the alignment they imply
    pub fn detect(&self, frame: &CapturedFrame) -> (Vec<Corner>, AlignmentStatus) {
        let corners = self.corner_detector().detect(&frame.data, frame.width, frame.height);
        let status = AlignmentStatus::from_corner_count(corners.len());
        info!("Detected {} corners: {:?}", corners.len(), status);
        (corners, status)
    }

    /// A capture session configured from this app's settings
    pub fn capture_session(&self) -> CaptureSession {
        let session = CaptureSession::new(self.corner_detector(), self.config.alignment.clone());
        match &self.events {
            Some(events) => session.with_events(events.clone()),
            None => session,
        }
    }

    /// Open `camera` and run `session` until it captures a frame
    pub async fn capture(&self, camera: &dyn Camera, session: &mut CaptureSession) -> Result<CapturedFrame> {
        let mut stream = capture::acquire(camera, &self.config.camera, self.config.alignment.acquire_timeout_ms)
            .await
            .context("Failed to acquire camera")?;
        let frame = session
            .run(stream.as_mut())
            .await
            .context("Capture session ended without a frame")?;
        Ok(frame)
    }

    /// Capture from `camera`, then recognize and score
    pub async fn scan(&self, camera: &dyn Camera, template: Arc<Template>, key: KeySource<'_>) -> Result<OmrReport> {
        let mut session = self.capture_session();
        let frame = self.capture(camera, &mut session).await?;
        self.process(template, frame, key).await
    }

    /// Recognize `frame` against `template` and score it
    pub async fn process(&self, template: Arc<Template>, frame: CapturedFrame, key: KeySource<'_>) -> Result<OmrReport> {
        let mut ctx = SessionContext::new(template);
        let recognition = self
            .recognizer
            .recognize(&frame, ctx.template(), self.ocr.as_ref())
            .await
            .context("Recognition failed")?;
        let key_is_student_form = matches!(key, KeySource::Form(key_frame) if key_frame.same_image(&frame));
        ctx.set_frame(frame);
        ctx.set_recognition(recognition);

        let (answer_key, key_mode) = match key {
            KeySource::Template => {
                let key = match &ctx.template().answer_key {
                    Some(key) => key.clone(),
                    None => {
                        warn!("Template has no answer key");
                        ctx.warn("Template has no answer key; every question is unscored");
                        AnswerKey::new()
                    }
                };
                (key, KeyMode::Template)
            }
            KeySource::Form(key_frame) => {
                if key_is_student_form {
                    warn!("Key form is the student form");
                }
                (self.recognizer.read_answer_key(key_frame, ctx.template()), KeyMode::Form)
            }
            KeySource::SelfKey => {
                let key = ctx
                    .recognition()
                    .map(|r| r.student_answers.clone())
                    .unwrap_or_default();
                (key, KeyMode::SelfKey)
            }
        };

        let self_key = matches!(key, KeySource::SelfKey) || key_is_student_form;
        if self_key {
            ctx.warn("Answer key is the student's own form; every marked answer counts as correct");
        }

        let template = ctx.shared_template();
        let (recognition, warnings) = ctx.finish();
        let recognition = recognition.context("Recognition result missing from session")?;
        let report = score(&recognition.student_answers, &answer_key, &template);

        info!(
            "Student {}: {} correct, {} incorrect, {} blank, {} invalid, score {} ({}%)",
            recognition.student_id,
            report.stats.correct,
            report.stats.incorrect,
            report.stats.blank,
            report.stats.invalid,
            report.stats.score,
            report.stats.percentage
        );

        Ok(OmrReport {
            recognition,
            answer_key,
            key_mode,
            self_key,
            stats: report.stats,
            details: report.details,
            warnings,
        })
    }
}
