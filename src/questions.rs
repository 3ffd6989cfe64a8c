use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, FromRow, SqlitePool};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult, FieldError};
use crate::grading::{QuestionLookup, BLOCK_COUNT, QUESTIONS_PER_BLOCK};
use crate::jwt::AdminSession;
use crate::validation::{validate_block, validate_question, validate_question_batch, AppJson};
use crate::AppState;

// ============================================================================
// Data Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub block: u8,
    pub question: String,
    pub answers: Vec<String>,
    pub correct: Vec<u8>,
    pub image_path: String,
    pub youtube_url: String,
}

/// Body for creating, updating and importing questions
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionInput {
    pub block: i64,
    pub question: String,
    pub answers: Vec<String>,
    pub correct: Vec<i64>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub youtube_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub questions: Vec<QuestionInput>,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub imported: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPage {
    pub data: Vec<Question>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSet {
    pub questions: Vec<Question>,
    pub total_questions: usize,
    pub blocks_count: u8,
    pub questions_per_block: usize,
}

#[derive(Debug, Deserialize)]
pub struct RandomQuery {
    pub block: Option<i64>,
    pub count: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, FromRow)]
struct QuestionRow {
    id: String,
    block: i64,
    question: String,
    answers: SqlJson<Vec<String>>,
    correct: SqlJson<Vec<u8>>,
    image_path: String,
    youtube_url: String,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Question {
            id: row.id,
            block: u8::try_from(row.block).unwrap_or(0),
            question: row.question,
            answers: row.answers.0,
            correct: row.correct.0,
            image_path: row.image_path,
            youtube_url: row.youtube_url,
        }
    }
}

/// Validated input converted to stored form; call only after `validate_question`
fn to_question(id: String, input: QuestionInput) -> Question {
    Question {
        id,
        block: u8::try_from(input.block).unwrap_or(0),
        question: input.question.trim().to_string(),
        answers: input.answers,
        correct: input
            .correct
            .iter()
            .filter_map(|&i| u8::try_from(i).ok())
            .collect(),
        image_path: input.image_path.unwrap_or_default(),
        youtube_url: input.youtube_url.unwrap_or_default(),
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, block, question, answers, correct, image_path, youtube_url FROM questions";

// ============================================================================
// Queries
// ============================================================================

async fn insert_question<'e, E>(executor: E, question: &Question, now: DateTime<Utc>) -> AppResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO questions (id, block, question, answers, correct, image_path, youtube_url, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&question.id)
    .bind(i64::from(question.block))
    .bind(&question.question)
    .bind(SqlJson(&question.answers))
    .bind(SqlJson(&question.correct))
    .bind(&question.image_path)
    .bind(&question.youtube_url)
    .bind(now.to_rfc3339_opts(SecondsFormat::Micros, true))
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn create_question(pool: &SqlitePool, input: QuestionInput) -> AppResult<Question> {
    validate_question(&input)?;

    let question = to_question(Uuid::new_v4().to_string(), input);
    insert_question(pool, &question, Utc::now()).await?;

    tracing::info!(id = %question.id, block = question.block, "Question created");
    Ok(question)
}

pub async fn fetch_question(pool: &SqlitePool, id: &str) -> AppResult<Option<Question>> {
    let row: Option<QuestionRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(Question::from))
}

pub async fn fetch_all_questions(pool: &SqlitePool) -> AppResult<Vec<Question>> {
    let rows: Vec<QuestionRow> =
        sqlx::query_as(&format!("{} ORDER BY created_at, id", SELECT_COLUMNS))
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(Question::from).collect())
}

pub async fn fetch_question_page(pool: &SqlitePool, page: i64, page_size: i64) -> AppResult<QuestionPage> {
    let mut errors = Vec::new();
    if page < 1 {
        errors.push(FieldError::new("page", "Page must be a positive number"));
    }
    if page_size < 1 {
        errors.push(FieldError::new("pageSize", "Page size must be a positive number"));
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let offset = (page - 1).checked_mul(page_size).ok_or_else(|| {
        AppError::Validation(vec![FieldError::new("page", "Page is out of range")])
    })?;

    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM questions")
        .fetch_one(pool)
        .await?;

    let rows: Vec<QuestionRow> = sqlx::query_as(&format!(
        "{} ORDER BY created_at, id LIMIT ? OFFSET ?",
        SELECT_COLUMNS
    ))
    .bind(page_size)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(QuestionPage {
        data: rows.into_iter().map(Question::from).collect(),
        total: total.0,
        page,
        page_size,
        total_pages: total.0 / page_size + i64::from(total.0 % page_size != 0),
    })
}

pub async fn fetch_questions_by_block(pool: &SqlitePool, block: u8) -> AppResult<Vec<Question>> {
    let rows: Vec<QuestionRow> = sqlx::query_as(&format!(
        "{} WHERE block = ? ORDER BY created_at, id",
        SELECT_COLUMNS
    ))
    .bind(i64::from(block))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Question::from).collect())
}

/// Sample `count` distinct questions from one block
pub async fn fetch_random_questions(pool: &SqlitePool, block: u8, count: usize) -> AppResult<Vec<Question>> {
    let rows: Vec<QuestionRow> = sqlx::query_as(&format!(
        "{} WHERE block = ? ORDER BY RANDOM() LIMIT ?",
        SELECT_COLUMNS
    ))
    .bind(i64::from(block))
    .bind(count as i64)
    .fetch_all(pool)
    .await?;

    if rows.len() < count {
        return Err(AppError::Validation(vec![FieldError::new(
            "count",
            format!(
                "Not enough questions in block {}. Found {}, need {}",
                block,
                rows.len(),
                count
            ),
        )]));
    }

    Ok(rows.into_iter().map(Question::from).collect())
}

pub async fn fetch_test_set(pool: &SqlitePool) -> AppResult<TestSet> {
    let mut questions = Vec::with_capacity(BLOCK_COUNT as usize * QUESTIONS_PER_BLOCK);
    for block in 1..=BLOCK_COUNT {
        questions.extend(fetch_random_questions(pool, block, QUESTIONS_PER_BLOCK).await?);
    }

    Ok(TestSet {
        total_questions: questions.len(),
        questions,
        blocks_count: BLOCK_COUNT,
        questions_per_block: QUESTIONS_PER_BLOCK,
    })
}

/// Question count per block, with every block present
pub async fn fetch_question_counts(pool: &SqlitePool) -> AppResult<BTreeMap<String, i64>> {
    let rows: Vec<(i64, i64)> =
        sqlx::query_as("SELECT block, COUNT(*) FROM questions GROUP BY block ORDER BY block")
            .fetch_all(pool)
            .await?;

    let mut counts: BTreeMap<String, i64> =
        (1..=BLOCK_COUNT).map(|b| (b.to_string(), 0)).collect();
    for (block, count) in rows {
        counts.insert(block.to_string(), count);
    }

    Ok(counts)
}

pub async fn update_question(pool: &SqlitePool, id: &str, input: QuestionInput) -> AppResult<Question> {
    validate_question(&input)?;

    let question = to_question(id.to_string(), input);
    let result = sqlx::query(
        r#"
        UPDATE questions
        SET block = ?, question = ?, answers = ?, correct = ?, image_path = ?, youtube_url = ?
        WHERE id = ?
        "#,
    )
    .bind(i64::from(question.block))
    .bind(&question.question)
    .bind(SqlJson(&question.answers))
    .bind(SqlJson(&question.correct))
    .bind(&question.image_path)
    .bind(&question.youtube_url)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Question {} not found", id)));
    }

    Ok(question)
}

pub async fn delete_question(pool: &SqlitePool, id: &str) -> AppResult<Question> {
    let question = fetch_question(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Question {} not found", id)))?;

    sqlx::query("DELETE FROM questions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    tracing::info!(id, "Question deleted");
    Ok(question)
}

/// Replace the whole question bank; nothing is written unless every item validates
pub async fn import_questions(pool: &SqlitePool, inputs: Vec<QuestionInput>) -> AppResult<usize> {
    validate_question_batch(&inputs)?;

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM questions").execute(&mut *tx).await?;

    // Distinct timestamps keep listings in import order
    let imported = inputs.len();
    for (i, input) in inputs.into_iter().enumerate() {
        let question = to_question(Uuid::new_v4().to_string(), input);
        insert_question(&mut *tx, &question, now + Duration::microseconds(i as i64)).await?;
    }

    tx.commit().await?;

    tracing::info!(imported, "Question bank replaced");
    Ok(imported)
}

pub async fn export_questions(pool: &SqlitePool) -> AppResult<Vec<Question>> {
    let rows: Vec<QuestionRow> = sqlx::query_as(&format!(
        "{} ORDER BY block, created_at, id",
        SELECT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Question::from).collect())
}

#[async_trait]
impl QuestionLookup for SqlitePool {
    async fn resolve(&self, question_id: &str) -> AppResult<Option<Question>> {
        fetch_question(self, question_id).await
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn parse_block(raw: &str) -> AppResult<u8> {
    raw.parse::<i64>()
        .map_err(|_| FieldError::new("block", "Block must be a number between 1 and 6"))
        .and_then(validate_block)
        .map_err(|e| AppError::Validation(vec![e]))
}

/// List the whole question bank
pub async fn list_questions(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(Json(fetch_all_questions(&state.db).await?))
}

pub async fn get_questions_by_block(
    State(state): State<Arc<AppState>>,
    Path(block): Path<String>,
) -> AppResult<impl IntoResponse> {
    let block = parse_block(&block)?;
    Ok(Json(fetch_questions_by_block(&state.db, block).await?))
}

pub async fn get_random_questions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RandomQuery>,
) -> AppResult<impl IntoResponse> {
    let block = query
        .block
        .ok_or_else(|| FieldError::new("block", "Block must be a number between 1 and 6"))
        .and_then(validate_block)
        .map_err(|e| AppError::Validation(vec![e]))?;

    let count = match query.count {
        Some(c) if c >= 1 => c as usize,
        Some(_) => {
            return Err(AppError::Validation(vec![FieldError::new(
                "count",
                "Count must be a positive number",
            )]))
        }
        None => QUESTIONS_PER_BLOCK,
    };

    Ok(Json(fetch_random_questions(&state.db, block, count).await?))
}

/// Ten random questions from every block
pub async fn get_test_set(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(Json(fetch_test_set(&state.db).await?))
}

pub async fn get_question_counts(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    Ok(Json(fetch_question_counts(&state.db).await?))
}

pub async fn get_question(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let question = fetch_question(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Question {} not found", id)))?;
    Ok(Json(question))
}

pub async fn post_question(
    _admin: AdminSession,
    State(state): State<Arc<AppState>>,
    AppJson(input): AppJson<QuestionInput>,
) -> AppResult<impl IntoResponse> {
    let question = create_question(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

pub async fn patch_question(
    _admin: AdminSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppJson(input): AppJson<QuestionInput>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(update_question(&state.db, &id, input).await?))
}

pub async fn remove_question(
    _admin: AdminSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(delete_question(&state.db, &id).await?))
}

pub async fn post_import(
    _admin: AdminSession,
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<ImportRequest>,
) -> AppResult<impl IntoResponse> {
    let imported = import_questions(&state.db, req.questions).await?;
    Ok(Json(ImportResponse { imported }))
}

pub async fn get_export(
    _admin: AdminSession,
    State(state): State<Arc<AppState>>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(export_questions(&state.db).await?))
}
