//! Answer comparison and scoring
//!
//! Scores are always recomputed from the full answer set. Nothing here keeps
//! running totals, so scoring the same inputs twice gives identical output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::template::{AnswerKey, Template};
use crate::vision::bubble::BubbleReading;

/// Outcome for a single question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Correct,
    Incorrect,
    Blank,
    Invalid,
    /// The key has no usable answer; not counted as correct or incorrect
    UndefinedKey,
}

/// Per-question comparison line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionDetail {
    pub question: u32,
    pub student_answer: BubbleReading,
    pub correct_answer: Option<BubbleReading>,
    pub status: QuestionStatus,
}

/// Aggregate result of one scoring pass
///
/// Every question lands in exactly one counter, so
/// `correct + incorrect + blank + invalid + undefined_key == question_count`.
/// The first four alone add up to `question_count` only when the key defines
/// every marked question.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreStats {
    pub correct: u32,
    pub incorrect: u32,
    pub blank: u32,
    pub invalid: u32,
    /// Questions skipped because the key had no answer for them
    pub undefined_key: u32,
    pub score: f64,
    /// Share of correct answers in percent, one decimal place
    pub percentage: f64,
}

/// Stats plus the per-question breakdown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreReport {
    pub stats: ScoreStats,
    pub details: Vec<QuestionDetail>,
}

/// Classify one answer against its key entry
pub fn classify(student: BubbleReading, key: Option<BubbleReading>) -> QuestionStatus {
    match (student, key) {
        (BubbleReading::Blank, _) => QuestionStatus::Blank,
        (BubbleReading::Invalid, _) => QuestionStatus::Invalid,
        (_, None | Some(BubbleReading::Blank)) => QuestionStatus::UndefinedKey,
        (student, Some(expected)) if student == expected => QuestionStatus::Correct,
        _ => QuestionStatus::Incorrect,
    }
}

/// Score `student_answers` against `answer_key` for questions `1..=question_count`
pub fn score(
    student_answers: &BTreeMap<u32, BubbleReading>,
    answer_key: &AnswerKey,
    template: &Template,
) -> ScoreReport {
    let mut stats = ScoreStats {
        correct: 0,
        incorrect: 0,
        blank: 0,
        invalid: 0,
        undefined_key: 0,
        score: 0.0,
        percentage: 0.0,
    };
    let mut details = Vec::with_capacity(template.question_count as usize);

    for question in 1..=template.question_count {
        let student_answer = student_answers
            .get(&question)
            .copied()
            .unwrap_or(BubbleReading::Blank);
        let correct_answer = answer_key.get(&question).copied();
        let status = classify(student_answer, correct_answer);

        match status {
            QuestionStatus::Correct => stats.correct += 1,
            QuestionStatus::Incorrect => stats.incorrect += 1,
            QuestionStatus::Blank => stats.blank += 1,
            QuestionStatus::Invalid => stats.invalid += 1,
            QuestionStatus::UndefinedKey => stats.undefined_key += 1,
        }

        details.push(QuestionDetail {
            question,
            student_answer,
            correct_answer,
            status,
        });
    }

    stats.score = stats.correct as f64 * template.score_per_correct;
    stats.percentage = if template.question_count == 0 {
        0.0
    } else {
        (stats.correct as f64 / template.question_count as f64 * 1000.0).round() / 10.0
    };

    debug!(
        "Scored {} questions: {} correct, {} incorrect, {} blank, {} invalid, {} without key",
        template.question_count, stats.correct, stats.incorrect, stats.blank, stats.invalid, stats.undefined_key
    );

    ScoreReport { stats, details }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::tests::grid_template_json;

    fn answers(pairs: &[(u32, &str)]) -> BTreeMap<u32, BubbleReading> {
        pairs
            .iter()
            .map(|(q, a)| (*q, BubbleReading::try_from(a.to_string()).unwrap()))
            .collect()
    }

    fn template(questions: u32) -> Template {
        Template::from_json(&grid_template_json(questions, 4, "{}")).unwrap()
    }

    #[test]
    fn test_mixed_scenario() {
        let template = template(3);
        let key = answers(&[(1, "A"), (2, "B"), (3, "-")]);
        let student = answers(&[(1, "A"), (2, "C"), (3, "-")]);

        let report = score(&student, &key, &template);
        assert_eq!(report.stats.correct, 1);
        assert_eq!(report.stats.incorrect, 1);
        assert_eq!(report.stats.blank, 1);
        assert_eq!(report.stats.invalid, 0);
        assert_eq!(report.stats.score, 5.0);
        assert_eq!(report.stats.percentage, 33.3);

        let statuses: Vec<_> = report.details.iter().map(|d| d.status).collect();
        assert_eq!(
            statuses,
            vec![QuestionStatus::Correct, QuestionStatus::Incorrect, QuestionStatus::Blank]
        );
    }

    #[test]
    fn test_counters_cover_every_question() {
        let template = template(5);
        let key = answers(&[(1, "A"), (2, "B"), (3, "C"), (4, "D"), (5, "A")]);
        let student = answers(&[(1, "A"), (2, "X"), (4, "B")]);

        let stats = score(&student, &key, &template).stats;
        assert_eq!(stats.correct + stats.incorrect + stats.blank + stats.invalid, 5);
        assert_eq!(stats.blank, 2); // 3 and 5 are missing
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.percentage, 20.0);
    }

    #[test]
    fn test_partial_key_counters_sum_to_question_count() {
        let template = template(6);
        let key = answers(&[(1, "A"), (2, "B"), (4, "-")]);
        let student = answers(&[(1, "A"), (2, "C"), (3, "D"), (4, "A"), (5, "X")]);

        let stats = score(&student, &key, &template).stats;
        assert_eq!(stats.correct, 1);
        assert_eq!(stats.incorrect, 1);
        assert_eq!(stats.blank, 1);
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.undefined_key, 2);
        assert_eq!(
            stats.correct + stats.incorrect + stats.blank + stats.invalid + stats.undefined_key,
            template.question_count
        );
    }

    #[test]
    fn test_undefined_key_is_reported_not_scored() {
        let template = template(2);
        let key = answers(&[(1, "-")]);
        let student = answers(&[(1, "A"), (2, "B")]);

        let report = score(&student, &key, &template);
        assert_eq!(report.stats.undefined_key, 2);
        assert_eq!(report.stats.correct, 0);
        assert_eq!(report.stats.incorrect, 0);
        assert_eq!(report.details[1].correct_answer, None);
    }

    #[test]
    fn test_blank_and_invalid_take_precedence_over_missing_key() {
        assert_eq!(classify(BubbleReading::Blank, None), QuestionStatus::Blank);
        assert_eq!(classify(BubbleReading::Invalid, None), QuestionStatus::Invalid);
        assert_eq!(
            classify(BubbleReading::Selected('A'), Some(BubbleReading::Invalid)),
            QuestionStatus::Incorrect
        );
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let template = template(4);
        let key = answers(&[(1, "A"), (2, "B"), (3, "C"), (4, "D")]);
        let student = answers(&[(1, "A"), (2, "B"), (3, "X")]);

        let first = score(&student, &key, &template);
        let second = score(&student, &key, &template);
        assert_eq!(first, second);
        assert_eq!(first.stats.score.to_bits(), second.stats.score.to_bits());
        assert_eq!(first.stats.percentage.to_bits(), second.stats.percentage.to_bits());
    }

    #[test]
    fn test_self_key_scores_every_answer_correct() {
        let template = template(3);
        let student = answers(&[(1, "A"), (2, "C"), (3, "D")]);
        let stats = score(&student, &student, &template).stats;
        assert_eq!(stats.correct, 3);
        assert_eq!(stats.percentage, 100.0);
    }
}
