//! Explicit validation for every input shape the API accepts.
//!
//! Each validator returns the full list of field-level problems instead of
//! stopping at the first one, so the client can highlight all of them.

use axum::extract::FromRequest;
use std::collections::HashSet;

use crate::error::{AppError, FieldError};
use crate::grading::BLOCK_COUNT;
use crate::questions::QuestionInput;
use crate::results::{CreateResultRequest, SubmitTestRequest, SubmittedAnswer};

pub const FULL_NAME_MESSAGE: &str =
    "Full name must be 3 Cyrillic words, each starting with capital letter and at least 3 characters long";

const MIN_NAME_PART_CHARS: usize = 3;
const ANSWERS_PER_QUESTION: usize = 4;

/// JSON body extractor that reports malformed bodies as `AppError::BadRequest`
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

fn is_cyrillic_letter(c: char) -> bool {
    matches!(c, 'А'..='Я' | 'а'..='я' | 'І' | 'Ї' | 'Є' | 'Ё' | 'і' | 'ї' | 'є' | 'ё')
}

fn is_valid_name_part(part: &str) -> bool {
    part.chars().count() >= MIN_NAME_PART_CHARS
        && part.chars().all(is_cyrillic_letter)
        && part.chars().next().is_some_and(char::is_uppercase)
}

/// Surname, given name and patronymic: three capitalized Cyrillic words
pub fn validate_full_name(full_name: &str) -> Result<(), Vec<FieldError>> {
    let parts: Vec<&str> = full_name.split_whitespace().collect();

    if parts.len() == 3 && parts.iter().all(|p| is_valid_name_part(p)) {
        Ok(())
    } else {
        Err(vec![FieldError::new("fullName", FULL_NAME_MESSAGE)])
    }
}

pub fn validate_block(block: i64) -> Result<u8, FieldError> {
    u8::try_from(block)
        .ok()
        .filter(|b| (1..=BLOCK_COUNT).contains(b))
        .ok_or_else(|| FieldError::new("block", "Block must be between 1 and 6"))
}

pub fn validate_question(input: &QuestionInput) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    if let Err(e) = validate_block(input.block) {
        errors.push(e);
    }

    if input.question.trim().is_empty() {
        errors.push(FieldError::new("question", "Question text is required"));
    }

    if input.answers.len() != ANSWERS_PER_QUESTION {
        errors.push(FieldError::new(
            "answers",
            "Answers must be an array of exactly 4 items",
        ));
    }

    if input.correct.is_empty() {
        errors.push(FieldError::new(
            "correct",
            "Correct answers array cannot be empty",
        ));
    } else {
        if input.correct.len() > ANSWERS_PER_QUESTION {
            errors.push(FieldError::new(
                "correct",
                "Correct answers array cannot have more than 4 items",
            ));
        }

        if input
            .correct
            .iter()
            .any(|&i| i < 0 || i >= ANSWERS_PER_QUESTION as i64)
        {
            errors.push(FieldError::new(
                "correct",
                "All correct answer indices must be between 0 and 3",
            ));
        }

        let unique: HashSet<i64> = input.correct.iter().copied().collect();
        if unique.len() != input.correct.len() {
            errors.push(FieldError::new(
                "correct",
                "Correct answers array cannot contain duplicates",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a whole import batch; field names carry the item position
pub fn validate_question_batch(inputs: &[QuestionInput]) -> Result<(), Vec<FieldError>> {
    let errors: Vec<FieldError> = inputs
        .iter()
        .enumerate()
        .filter_map(|(i, input)| validate_question(input).err().map(|errs| (i, errs)))
        .flat_map(|(i, errs)| {
            errs.into_iter().map(move |e| {
                FieldError::new(
                    format!("questions[{}].{}", i + 1, e.field),
                    format!("Question {}: {}", i + 1, e.message),
                )
            })
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Shape check for submit/calculate bodies; returns the trimmed name and answers
pub fn validate_submission(req: SubmitTestRequest) -> Result<(String, Vec<SubmittedAnswer>), AppError> {
    match (req.full_name, req.answers) {
        (Some(name), Some(answers)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), answers))
        }
        _ => Err(AppError::BadRequest(
            "Full name and answers are required".to_string(),
        )),
    }
}

pub fn validate_result(req: &CreateResultRequest) -> Result<(), Vec<FieldError>> {
    let mut errors = validate_full_name(&req.full_name).err().unwrap_or_default();

    let blocks_ok = req.block_scores.len() == BLOCK_COUNT as usize
        && (1..=BLOCK_COUNT).all(|b| {
            req.block_scores
                .get(&b.to_string())
                .is_some_and(|s| (0..=100).contains(s))
        });
    if !blocks_ok {
        errors.push(FieldError::new(
            "block_scores",
            "Block scores must contain scores for blocks 1-6 with values 0-100",
        ));
    }

    if !(0..=100).contains(&req.total_score) {
        errors.push(FieldError::new(
            "total_score",
            "Total score must be between 0 and 100",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
