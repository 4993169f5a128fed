//! Template reading plan
//!
//! Turns a template's flat bubble lists into the groups the classifier reads:
//! one group per question and one group per student number column.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use super::Template;
use crate::vision::bubble::GroupMember;

/// Bubbles that are read together and yield one symbol
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BubbleGroup {
    /// Question number, or digit column for student number groups
    pub key: u32,
    /// Members in template order
    pub members: Vec<GroupMember>,
}

/// Mismatch between what the template declares and what it contains
///
/// These are warnings, never rejections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// The embedded answer key covers fewer questions than declared
    AnswerKeyIncomplete { question_count: u32, defined: u32 },
    /// A declared question has no answer bubbles
    QuestionWithoutBubbles { question: u32 },
    /// A question group does not hold `option_count` bubbles
    OptionCountMismatch { question: u32, expected: u32, found: u32 },
    /// A student number column does not hold ten bubbles
    DigitColumnIncomplete { column: u32, found: u32 },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnswerKeyIncomplete { question_count, defined } => write!(
                f,
                "template has {} questions but the answer key defines only {}",
                question_count, defined
            ),
            Self::QuestionWithoutBubbles { question } => {
                write!(f, "question {} has no answer bubbles", question)
            }
            Self::OptionCountMismatch { question, expected, found } => write!(
                f,
                "question {} has {} bubbles, expected {}",
                question, found, expected
            ),
            Self::DigitColumnIncomplete { column, found } => write!(
                f,
                "student number column {} has {} bubbles, expected 10",
                column + 1,
                found
            ),
        }
    }
}

/// Everything the recognizer needs to read a form
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadingPlan {
    /// Question groups in ascending question order
    pub answer_groups: Vec<BubbleGroup>,
    /// Student number groups in column order
    pub student_id_groups: Vec<BubbleGroup>,
    pub discrepancies: Vec<Discrepancy>,
}

/// Group a template's bubbles for reading
pub fn build_groups(template: &Template) -> ReadingPlan {
    let mut discrepancies = Vec::new();

    let mut by_question: BTreeMap<u32, Vec<GroupMember>> = BTreeMap::new();
    for bubble in &template.answer_bubbles {
        by_question.entry(bubble.question).or_default().push(GroupMember {
            x: bubble.x,
            y: bubble.y,
            radius: bubble.radius,
            symbol: bubble.option,
        });
    }

    for question in 1..=template.question_count {
        match by_question.get(&question) {
            None => discrepancies.push(Discrepancy::QuestionWithoutBubbles { question }),
            Some(members) if members.len() as u32 != template.option_count => {
                discrepancies.push(Discrepancy::OptionCountMismatch {
                    question,
                    expected: template.option_count,
                    found: members.len() as u32,
                })
            }
            Some(_) => {}
        }
    }

    let answer_groups = by_question
        .into_iter()
        .map(|(key, members)| BubbleGroup { key, members })
        .collect();

    let student_id_groups = (0..template.student_id_digits)
        .map(|column| {
            let members: Vec<GroupMember> = template
                .student_id_bubbles
                .iter()
                .filter(|b| b.digit_position == column)
                .map(|b| GroupMember {
                    x: b.x,
                    y: b.y,
                    radius: b.radius,
                    symbol: char::from(b'0' + b.digit_value),
                })
                .collect();
            if !template.student_id_bubbles.is_empty() && members.len() != 10 {
                discrepancies.push(Discrepancy::DigitColumnIncomplete {
                    column,
                    found: members.len() as u32,
                });
            }
            BubbleGroup { key: column, members }
        })
        .collect();

    if let Some(key) = &template.answer_key {
        let defined = key.keys().filter(|q| (1..=template.question_count).contains(*q)).count() as u32;
        if defined < template.question_count {
            discrepancies.push(Discrepancy::AnswerKeyIncomplete {
                question_count: template.question_count,
                defined,
            });
        }
    }

    for discrepancy in &discrepancies {
        warn!("Template discrepancy: {}", discrepancy);
    }

    ReadingPlan {
        answer_groups,
        student_id_groups,
        discrepancies,
    }
}
