use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod admin;
mod config;
mod db;
mod error;
mod grading;
mod jwt;
mod questions;
mod results;
mod validation;

use admin::{CredentialStore, FilePasswordStore};
use config::Config;

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    pub db: SqlitePool,
    pub jwt_secret: String,
    pub credentials: Arc<dyn CredentialStore>,
}

// ============================================================================
// Router
// ============================================================================

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tacmed-quiz-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// API routes; admin-only handlers take an `AdminSession` argument
fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/questions",
            get(questions::list_questions).post(questions::post_question),
        )
        .route(
            "/api/questions/by-block/:block",
            get(questions::get_questions_by_block),
        )
        .route("/api/questions/random", get(questions::get_random_questions))
        .route("/api/questions/test-set", get(questions::get_test_set))
        .route("/api/questions/counts", get(questions::get_question_counts))
        .route("/api/questions/import", post(questions::post_import))
        .route("/api/questions/export", get(questions::get_export))
        .route(
            "/api/questions/:id",
            get(questions::get_question)
                .patch(questions::patch_question)
                .delete(questions::remove_question),
        )
        .route(
            "/api/results",
            get(results::list_results).post(results::post_result),
        )
        .route("/api/results/submit-test", post(results::submit_test))
        .route("/api/results/calculate", post(results::calculate))
        .route("/api/results/by-user", get(results::get_results_by_user))
        .route("/api/results/statistics", get(results::get_statistics))
        .route("/api/admin/login", post(jwt::login))
        .route("/api/admin/change-password", post(admin::post_change_password))
        .route("/api/admin/dashboard", get(admin::get_dashboard))
        .route("/api/admin/results", get(admin::get_admin_results))
        .route("/api/admin/questions", get(admin::get_admin_questions))
        .with_state(state)
}

fn cors_layer(origin_url: Option<&str>) -> anyhow::Result<CorsLayer> {
    let cors = match origin_url {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .context("Failed to parse ORIGIN_URL")?,
            )
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    Ok(cors)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tacmed_quiz=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Connecting to database: {}", config.database_url);

    let connect_options: SqliteConnectOptions = config
        .database_url
        .parse::<SqliteConnectOptions>()
        .context("Failed to parse DATABASE_URL")?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect_with(connect_options)
        .await
        .context("Failed to connect to database")?;

    db::setup_database(&pool)
        .await
        .context("Failed to set up database schema")?;
    tracing::info!("Database setup complete");

    let state = Arc::new(AppState {
        db: pool,
        jwt_secret: config.admin_jwt_secret.clone(),
        credentials: Arc::new(FilePasswordStore::new(
            config.admin_password_file.clone(),
            config.admin_default_password.clone(),
        )),
    });

    let static_dir = &config.static_dir;
    let app = api_router(state)
        .fallback_service(
            ServeDir::new(static_dir)
                .not_found_service(ServeFile::new(format!("{}/index.html", static_dir))),
        )
        .layer(cors_layer(config.origin_url.as_deref())?)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    tracing::info!("Serving static files from {}", static_dir);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Server listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .await
        .context("Failed to serve application")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const SECRET: &str = "router-test-secret";
    const NAME: &str = "Петренко Іван Олегович";

    struct TestApp {
        router: Router,
        pool: SqlitePool,
        _dir: tempfile::TempDir,
    }

    async fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::test_pool().await;
        let state = Arc::new(AppState {
            db: pool.clone(),
            jwt_secret: SECRET.to_string(),
            credentials: Arc::new(FilePasswordStore::new(
                dir.path().join("admin-password.txt"),
                "12345",
            )),
        });
        TestApp {
            router: api_router(state),
            pool,
            _dir: dir,
        }
    }

    fn admin_token() -> String {
        jwt::issue_token(SECRET, chrono::Utc::now()).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn question_body(block: i64, text: &str, correct: Value) -> Value {
        json!({
            "block": block,
            "question": text,
            "answers": ["А", "Б", "В", "Г"],
            "correct": correct,
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app().await;
        let (status, body) = send(&app.router, get_request("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_login_flow() {
        let app = test_app().await;

        let (status, _) = send(
            &app.router,
            json_request("POST", "/api/admin/login", None, json!({ "password": "wrong" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &app.router,
            json_request("POST", "/api/admin/login", None, json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app.router,
            json_request("POST", "/api/admin/login", None, json!({ "password": "12345" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expires_in"], 3600);

        let token = body["token"].as_str().unwrap().to_string();
        let (status, body) =
            send(&app.router, get_request("/api/admin/dashboard", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["statistics"]["totalTests"], 0);
        assert_eq!(body["questionsCount"]["6"], 0);
    }

    #[tokio::test]
    async fn test_admin_routes_require_token() {
        let app = test_app().await;
        let expired = jwt::issue_token(SECRET, chrono::Utc::now() - chrono::Duration::hours(3))
            .unwrap();

        for token in [None, Some("garbage"), Some(expired.as_str())] {
            let (status, _) =
                send(&app.router, get_request("/api/admin/results", token)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }

        let (status, _) = send(
            &app.router,
            json_request("POST", "/api/questions", None, question_body(1, "q", json!([0]))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app.router, get_request("/api/results/statistics", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_question_crud_over_http() {
        let app = test_app().await;
        let token = admin_token();

        let (status, created) = send(
            &app.router,
            json_request(
                "POST",
                "/api/questions",
                Some(&token),
                question_body(3, "Що робити при кровотечі?", json!([0, 2])),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();

        let (status, fetched) =
            send(&app.router, get_request(&format!("/api/questions/{}", id), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["correct"], json!([0, 2]));

        let (status, body) = send(
            &app.router,
            json_request(
                "PATCH",
                &format!("/api/questions/{}", id),
                Some(&token),
                question_body(3, "x", json!([1, 1])),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["errors"][0]["field"], "correct");

        let (status, _) = send(
            &app.router,
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/questions/{}", id))
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) =
            send(&app.router, get_request(&format!("/api/questions/{}", id), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_by_block_validates_block() {
        let app = test_app().await;
        let (status, _) = send(&app.router, get_request("/api/questions/by-block/7", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) =
            send(&app.router, get_request("/api/questions/by-block/abc", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) =
            send(&app.router, get_request("/api/questions/by-block/2", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_submit_test_flow() {
        let app = test_app().await;
        let q = questions::create_question(
            &app.pool,
            questions::QuestionInput {
                block: 1,
                question: "Турнікет".to_string(),
                answers: vec!["А".into(), "Б".into(), "В".into(), "Г".into()],
                correct: vec![0, 1, 2],
                image_path: None,
                youtube_url: None,
            },
        )
        .await
        .unwrap();

        let body = json!({
            "fullName": NAME,
            "answers": [
                { "question_id": q.id, "selected_answers": [0, 1] },
                { "question_id": "unknown", "selected_answers": [0] }
            ]
        });

        let (status, calc) = send(
            &app.router,
            json_request("POST", "/api/results/calculate", None, body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(calc["blockScores"]["1"], 10);
        assert_eq!(calc["correctCount"], 1);
        assert_eq!(calc["skippedAnswers"], 1);
        assert_eq!(calc["knowledge_level"], "Низький");

        let (status, saved) = send(
            &app.router,
            json_request("POST", "/api/results/submit-test", None, body),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(saved["total_score"], 2);
        assert_eq!(saved["knowledge_level"], "Низький");

        let (status, mine) = send(
            &app.router,
            get_request(
                "/api/results/by-user?fullName=%D0%9F%D0%B5%D1%82%D1%80%D0%B5%D0%BD%D0%BA%D0%BE%20%D0%86%D0%B2%D0%B0%D0%BD%20%D0%9E%D0%BB%D0%B5%D0%B3%D0%BE%D0%B2%D0%B8%D1%87",
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_malformed_bodies() {
        let app = test_app().await;

        let cases = [
            json!({ "answers": [] }),
            json!({ "fullName": NAME }),
            json!({ "fullName": NAME, "answers": "nope" }),
            json!({ "fullName": "петренко Іван Олегович", "answers": [] }),
            json!({ "fullName": "Петренко Іван", "answers": [] }),
        ];
        for body in cases {
            let (status, _) = send(
                &app.router,
                json_request("POST", "/api/results/submit-test", None, body),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        let stored = results::fetch_results(&app.pool).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_by_user_requires_name() {
        let app = test_app().await;
        let (status, _) = send(&app.router, get_request("/api/results/by-user", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_questions_pagination() {
        let app = test_app().await;
        let token = admin_token();

        let batch: Vec<Value> = (0..12)
            .map(|i| question_body(i % 6 + 1, &format!("q{}", i), json!([0])))
            .collect();
        let (status, body) = send(
            &app.router,
            json_request(
                "POST",
                "/api/questions/import",
                Some(&token),
                json!({ "questions": batch }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["imported"], 12);

        let (status, page) = send(
            &app.router,
            get_request("/api/admin/questions?page=2&pageSize=5", Some(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 12);
        assert_eq!(page["totalPages"], 3);
        assert_eq!(page["data"].as_array().unwrap().len(), 5);

        let (status, _) = send(
            &app.router,
            get_request("/api/admin/questions?page=0", Some(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_change_password_over_http() {
        let app = test_app().await;
        let token = admin_token();

        let (status, body) = send(
            &app.router,
            json_request(
                "POST",
                "/api/admin/change-password",
                Some(&token),
                json!({ "oldPassword": "12345", "newPassword": "медик" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _) = send(
            &app.router,
            json_request("POST", "/api/admin/login", None, json!({ "password": "медик" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
