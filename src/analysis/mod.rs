//! Analysis Layer
//!
//! Compares recognized answers with an answer key and produces scores.

pub mod scoring;

pub use scoring::{classify, score, QuestionDetail, QuestionStatus, ScoreReport, ScoreStats};
