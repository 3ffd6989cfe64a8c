use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, FromRow, SqlitePool};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::grading::{calculate_test_result, BlockScores, KnowledgeLevel, ScoreOutcome};
use crate::jwt::AdminSession;
use crate::validation::{validate_full_name, validate_result, validate_submission, AppJson};
use crate::AppState;

const RECENT_TESTS_LIMIT: i64 = 10;

// ============================================================================
// Data Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: String,
    #[serde(default)]
    pub selected_answers: Vec<i64>,
}

/// Body of `/submit-test` and `/calculate`
#[derive(Debug, Deserialize)]
pub struct SubmitTestRequest {
    #[serde(rename = "fullName", default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub answers: Option<Vec<SubmittedAnswer>>,
}

/// Pre-computed result stored as-is
#[derive(Debug, Clone, Deserialize)]
pub struct CreateResultRequest {
    pub full_name: String,
    pub block_scores: BTreeMap<String, i64>,
    pub total_score: i64,
    #[serde(default)]
    pub incorrect_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub full_name: String,
    pub test_date: DateTime<Utc>,
    pub block_scores: BlockScores,
    pub total_score: u32,
    pub incorrect_list: Vec<String>,
}

impl TestResult {
    pub fn knowledge_level(&self) -> KnowledgeLevel {
        KnowledgeLevel::from_score(self.total_score)
    }
}

#[derive(Debug, Serialize)]
pub struct TestResultResponse {
    #[serde(flatten)]
    pub result: TestResult,
    pub knowledge_level: KnowledgeLevel,
}

impl From<TestResult> for TestResultResponse {
    fn from(result: TestResult) -> Self {
        let knowledge_level = result.knowledge_level();
        Self {
            result,
            knowledge_level,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CalculateResponse {
    #[serde(flatten)]
    pub outcome: ScoreOutcome,
    pub knowledge_level: KnowledgeLevel,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_tests: i64,
    pub average_score: i64,
    pub level_distribution: BTreeMap<String, i64>,
    pub recent_tests: Vec<TestResultResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ByUserQuery {
    #[serde(rename = "fullName")]
    pub full_name: Option<String>,
}

#[derive(Debug, FromRow)]
struct ResultRow {
    id: String,
    full_name: String,
    test_date: DateTime<Utc>,
    block_scores: SqlJson<BlockScores>,
    total_score: i64,
    incorrect_list: SqlJson<Vec<String>>,
}

impl From<ResultRow> for TestResult {
    fn from(row: ResultRow) -> Self {
        TestResult {
            id: row.id,
            full_name: row.full_name,
            test_date: row.test_date,
            block_scores: row.block_scores.0,
            total_score: row.total_score.clamp(0, 100) as u32,
            incorrect_list: row.incorrect_list.0,
        }
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, full_name, test_date, block_scores, total_score, incorrect_list FROM results";

// ============================================================================
// Queries
// ============================================================================

async fn insert_result(pool: &SqlitePool, result: &TestResult) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO results (id, full_name, test_date, block_scores, total_score, incorrect_list)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&result.id)
    .bind(&result.full_name)
    .bind(result.test_date.to_rfc3339_opts(SecondsFormat::Micros, true))
    .bind(SqlJson(&result.block_scores))
    .bind(i64::from(result.total_score))
    .bind(SqlJson(&result.incorrect_list))
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist a pre-computed result after checking its shape
pub async fn create_result(pool: &SqlitePool, req: CreateResultRequest) -> AppResult<TestResult> {
    validate_result(&req)?;

    let result = TestResult {
        id: Uuid::new_v4().to_string(),
        full_name: req.full_name.trim().to_string(),
        test_date: Utc::now(),
        block_scores: req
            .block_scores
            .into_iter()
            .map(|(block, score)| (block, score as u32))
            .collect(),
        total_score: req.total_score as u32,
        incorrect_list: req.incorrect_list,
    };
    insert_result(pool, &result).await?;

    Ok(result)
}

/// Grade a submission and store the outcome
pub async fn save_test_result(
    pool: &SqlitePool,
    full_name: &str,
    answers: &[SubmittedAnswer],
) -> AppResult<TestResult> {
    validate_full_name(full_name)?;

    let outcome = calculate_test_result(pool, answers).await?;
    let result = TestResult {
        id: Uuid::new_v4().to_string(),
        full_name: full_name.trim().to_string(),
        test_date: Utc::now(),
        block_scores: outcome.block_scores,
        total_score: outcome.total_score,
        incorrect_list: outcome.incorrect_questions,
    };
    insert_result(pool, &result).await?;

    tracing::info!(
        id = %result.id,
        total_score = result.total_score,
        level = %result.knowledge_level(),
        "Test result saved"
    );

    Ok(result)
}

pub async fn fetch_results(pool: &SqlitePool) -> AppResult<Vec<TestResult>> {
    let rows: Vec<ResultRow> =
        sqlx::query_as(&format!("{} ORDER BY test_date DESC", SELECT_COLUMNS))
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(TestResult::from).collect())
}

pub async fn fetch_results_by_user(pool: &SqlitePool, full_name: &str) -> AppResult<Vec<TestResult>> {
    let rows: Vec<ResultRow> = sqlx::query_as(&format!(
        "{} WHERE full_name = ? ORDER BY test_date DESC",
        SELECT_COLUMNS
    ))
    .bind(full_name.trim())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(TestResult::from).collect())
}

pub async fn fetch_statistics(pool: &SqlitePool) -> AppResult<Statistics> {
    let total_tests: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM results")
        .fetch_one(pool)
        .await?;

    let average: (Option<f64>,) = sqlx::query_as("SELECT AVG(total_score) FROM results")
        .fetch_one(pool)
        .await?;

    let scores: Vec<(i64,)> = sqlx::query_as("SELECT total_score FROM results")
        .fetch_all(pool)
        .await?;

    let mut level_distribution: BTreeMap<String, i64> = KnowledgeLevel::ALL
        .iter()
        .map(|level| (level.label().to_string(), 0))
        .collect();
    for (score,) in scores {
        let level = KnowledgeLevel::from_score(score.clamp(0, 100) as u32);
        *level_distribution.entry(level.label().to_string()).or_default() += 1;
    }

    let recent: Vec<ResultRow> = sqlx::query_as(&format!(
        "{} ORDER BY test_date DESC LIMIT ?",
        SELECT_COLUMNS
    ))
    .bind(RECENT_TESTS_LIMIT)
    .fetch_all(pool)
    .await?;

    Ok(Statistics {
        total_tests: total_tests.0,
        average_score: average.0.map(|a| a.round() as i64).unwrap_or(0),
        level_distribution,
        recent_tests: recent
            .into_iter()
            .map(|row| TestResult::from(row).into())
            .collect(),
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// Grade and persist a completed test
pub async fn submit_test(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<SubmitTestRequest>,
) -> AppResult<impl IntoResponse> {
    let (full_name, answers) = validate_submission(req)?;
    let result = save_test_result(&state.db, &full_name, &answers).await?;

    Ok((StatusCode::CREATED, Json(TestResultResponse::from(result))))
}

/// Grade without persisting
pub async fn calculate(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<SubmitTestRequest>,
) -> AppResult<impl IntoResponse> {
    let (_, answers) = validate_submission(req)?;
    let outcome = calculate_test_result(&state.db, &answers).await?;
    let knowledge_level = outcome.knowledge_level();

    Ok(Json(CalculateResponse {
        outcome,
        knowledge_level,
    }))
}

pub async fn get_results_by_user(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ByUserQuery>,
) -> AppResult<impl IntoResponse> {
    let full_name = query
        .full_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Full name is required".to_string()))?;

    let results: Vec<TestResultResponse> = fetch_results_by_user(&state.db, &full_name)
        .await?
        .into_iter()
        .map(TestResultResponse::from)
        .collect();

    Ok(Json(results))
}

pub async fn list_results(
    _admin: AdminSession,
    State(state): State<Arc<AppState>>,
) -> AppResult<impl IntoResponse> {
    let results: Vec<TestResultResponse> = fetch_results(&state.db)
        .await?
        .into_iter()
        .map(TestResultResponse::from)
        .collect();

    Ok(Json(results))
}

pub async fn post_result(
    _admin: AdminSession,
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateResultRequest>,
) -> AppResult<impl IntoResponse> {
    let result = create_result(&state.db, req).await?;
    Ok((StatusCode::CREATED, Json(TestResultResponse::from(result))))
}

pub async fn get_statistics(
    _admin: AdminSession,
    State(state): State<Arc<AppState>>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(fetch_statistics(&state.db).await?))
}
