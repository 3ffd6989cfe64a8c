//! Grading logic for test submissions
//!
//! Grades each answer with the partial-credit rule, aggregates per block and
//! overall, and maps the overall percentage onto a knowledge level.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::AppResult;
use crate::questions::Question;
use crate::results::SubmittedAnswer;

pub const BLOCK_COUNT: u8 = 6;
pub const QUESTIONS_PER_BLOCK: usize = 10;
pub const FULL_TEST_QUESTIONS: usize = BLOCK_COUNT as usize * QUESTIONS_PER_BLOCK;

/// Minimum share of a question's correct options that must be picked
const PASS_COVERAGE_PERCENT: f64 = 60.0;

/// Block number (as a string key, "1".."6") to percentage
pub type BlockScores = BTreeMap<String, u32>;

/// Resolves question ids to questions during grading
#[async_trait]
pub trait QuestionLookup: Send + Sync {
    async fn resolve(&self, question_id: &str) -> AppResult<Option<Question>>;
}

/// Grade one answer against the question's correct option indices.
///
/// Any wrong pick fails the answer outright. Otherwise the picks must cover
/// at least 60% of the correct options.
pub fn is_answer_correct(correct: &[u8], selected: &[i64]) -> bool {
    let selected: BTreeSet<i64> = selected.iter().copied().collect();
    if selected.is_empty() {
        return false;
    }

    let correct: BTreeSet<i64> = correct.iter().map(|&c| i64::from(c)).collect();
    if correct.is_empty() || !selected.is_subset(&correct) {
        return false;
    }

    let coverage = selected.len() as f64 / correct.len() as f64 * 100.0;
    coverage >= PASS_COVERAGE_PERCENT
}

/// Percentage of `correct` over `max(answered, canonical)`, rounded
fn percentage(correct: usize, answered: usize, canonical: usize) -> u32 {
    let denominator = answered.max(canonical);
    (correct as f64 / denominator as f64 * 100.0).round() as u32
}

/// Ordinal knowledge grade derived from the overall score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KnowledgeLevel {
    #[serde(rename = "Низький")]
    Low,
    #[serde(rename = "Початковий")]
    Initial,
    #[serde(rename = "Середній")]
    Medium,
    #[serde(rename = "Високий")]
    High,
    #[serde(rename = "Максимальний")]
    Maximal,
}

impl KnowledgeLevel {
    pub const ALL: [KnowledgeLevel; 5] = [
        KnowledgeLevel::Low,
        KnowledgeLevel::Initial,
        KnowledgeLevel::Medium,
        KnowledgeLevel::High,
        KnowledgeLevel::Maximal,
    ];

    pub fn from_score(score: u32) -> Self {
        match score {
            96.. => KnowledgeLevel::Maximal,
            81..=95 => KnowledgeLevel::High,
            51..=80 => KnowledgeLevel::Medium,
            21..=50 => KnowledgeLevel::Initial,
            _ => KnowledgeLevel::Low,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            KnowledgeLevel::Low => "Низький",
            KnowledgeLevel::Initial => "Початковий",
            KnowledgeLevel::Medium => "Середній",
            KnowledgeLevel::High => "Високий",
            KnowledgeLevel::Maximal => "Максимальний",
        }
    }
}

impl fmt::Display for KnowledgeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreOutcome {
    pub block_scores: BlockScores,
    pub total_score: u32,
    pub incorrect_questions: Vec<String>,
    pub correct_count: usize,
    pub total_questions: usize,
    pub skipped_answers: usize,
}

impl ScoreOutcome {
    pub fn knowledge_level(&self) -> KnowledgeLevel {
        KnowledgeLevel::from_score(self.total_score)
    }
}

/// Aggregate already-resolved answers.
///
/// `submitted` is the number of answers in the whole submission,
/// including the ones whose question could not be resolved.
pub fn score_resolved(
    resolved: &[(&Question, &SubmittedAnswer)],
    submitted: usize,
) -> ScoreOutcome {
    let mut block_scores = BlockScores::new();
    let mut incorrect_questions = Vec::new();
    let mut correct_count = 0;

    for block in 1..=BLOCK_COUNT {
        let mut answered = 0;
        let mut block_correct = 0;

        for (question, answer) in resolved.iter().filter(|(q, _)| q.block == block) {
            answered += 1;
            if is_answer_correct(&question.correct, &answer.selected_answers) {
                block_correct += 1;
            } else {
                incorrect_questions.push(question.question.clone());
            }
        }

        correct_count += block_correct;
        block_scores.insert(
            block.to_string(),
            percentage(block_correct, answered, QUESTIONS_PER_BLOCK),
        );
    }

    ScoreOutcome {
        block_scores,
        total_score: percentage(correct_count, submitted, FULL_TEST_QUESTIONS),
        incorrect_questions,
        correct_count,
        total_questions: submitted.max(FULL_TEST_QUESTIONS),
        skipped_answers: submitted.saturating_sub(resolved.len()),
    }
}

/// Resolve every answer's question and score the submission
pub async fn calculate_test_result<L>(
    lookup: &L,
    answers: &[SubmittedAnswer],
) -> AppResult<ScoreOutcome>
where
    L: QuestionLookup + ?Sized,
{
    let mut questions = Vec::with_capacity(answers.len());
    for answer in answers {
        questions.push(lookup.resolve(&answer.question_id).await?);
    }

    let resolved: Vec<(&Question, &SubmittedAnswer)> = questions
        .iter()
        .zip(answers)
        .filter_map(|(q, a)| q.as_ref().map(|q| (q, a)))
        .collect();

    let outcome = score_resolved(&resolved, answers.len());
    if outcome.skipped_answers > 0 {
        tracing::warn!(
            skipped = outcome.skipped_answers,
            submitted = answers.len(),
            "Skipped answers referencing unknown questions"
        );
    }

    Ok(outcome)
}
