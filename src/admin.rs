use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{AppError, AppResult, FieldError};
use crate::jwt::AdminSession;
use crate::questions::{fetch_question_counts, fetch_question_page, PageQuery};
use crate::results::{fetch_results, fetch_statistics, Statistics, TestResultResponse};
use crate::validation::AppJson;

const MIN_PASSWORD_CHARS: usize = 3;
const DEFAULT_PAGE_SIZE: i64 = 10;

/// Where the admin password lives
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn password(&self) -> AppResult<String>;

    async fn set_password(&self, password: &str) -> AppResult<()>;

    async fn verify(&self, candidate: &str) -> AppResult<bool> {
        Ok(self.password().await? == candidate)
    }
}

/// Password kept in a plain file; seeded with the default on first read
pub struct FilePasswordStore {
    path: PathBuf,
    default_password: String,
}

impl FilePasswordStore {
    pub fn new(path: impl Into<PathBuf>, default_password: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            default_password: default_password.into(),
        }
    }
}

#[async_trait]
impl CredentialStore for FilePasswordStore {
    async fn password(&self) -> AppResult<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(stored) => Ok(stored.trim().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "Seeding admin password file");
                self.set_password(&self.default_password).await?;
                Ok(self.default_password.clone())
            }
            Err(e) => Err(AppError::Internal(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn set_password(&self, password: &str) -> AppResult<()> {
        tokio::fs::write(&self.path, password).await.map_err(|e| {
            AppError::Internal(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct ChangePasswordResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub statistics: Statistics,
    pub questions_count: BTreeMap<String, i64>,
}

pub async fn change_password(
    store: &dyn CredentialStore,
    old_password: &str,
    new_password: &str,
) -> AppResult<()> {
    // Stored passwords are read back trimmed
    let new_password = new_password.trim();
    if old_password.is_empty() || new_password.is_empty() {
        return Err(AppError::BadRequest(
            "Old password and new password are required".to_string(),
        ));
    }

    if !store.verify(old_password).await? {
        return Err(AppError::Unauthorized("Invalid old password".to_string()));
    }

    if new_password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::Validation(vec![FieldError::new(
            "newPassword",
            "New password must be at least 3 characters long",
        )]));
    }

    store.set_password(new_password).await?;
    tracing::info!("Admin password changed");
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn post_change_password(
    admin: AdminSession,
    State(state): State<Arc<crate::AppState>>,
    AppJson(req): AppJson<ChangePasswordRequest>,
) -> AppResult<impl IntoResponse> {
    tracing::debug!(sub = %admin.claims.sub, "Password change requested");
    change_password(state.credentials.as_ref(), &req.old_password, &req.new_password).await?;
    Ok(Json(ChangePasswordResponse { success: true }))
}

/// Statistics plus the per-block size of the question bank
pub async fn get_dashboard(
    _admin: AdminSession,
    State(state): State<Arc<crate::AppState>>,
) -> AppResult<impl IntoResponse> {
    let (statistics, questions_count) = tokio::try_join!(
        fetch_statistics(&state.db),
        fetch_question_counts(&state.db)
    )?;

    Ok(Json(Dashboard {
        statistics,
        questions_count,
    }))
}

pub async fn get_admin_results(
    _admin: AdminSession,
    State(state): State<Arc<crate::AppState>>,
) -> AppResult<impl IntoResponse> {
    let results: Vec<TestResultResponse> = fetch_results(&state.db)
        .await?
        .into_iter()
        .map(TestResultResponse::from)
        .collect();

    Ok(Json(results))
}

pub async fn get_admin_questions(
    _admin: AdminSession,
    State(state): State<Arc<crate::AppState>>,
    Query(query): Query<PageQuery>,
) -> AppResult<impl IntoResponse> {
    let page = fetch_question_page(
        &state.db,
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    )
    .await?;

    Ok(Json(page))
}
