use sqlx::SqlitePool;

pub async fn setup_database(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS questions (
            id TEXT PRIMARY KEY,
            block INTEGER NOT NULL CHECK (block BETWEEN 1 AND 6),
            question TEXT NOT NULL,
            answers TEXT NOT NULL,
            correct TEXT NOT NULL,
            image_path TEXT NOT NULL DEFAULT '',
            youtube_url TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS results (
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            test_date TEXT NOT NULL,
            block_scores TEXT NOT NULL,
            total_score INTEGER NOT NULL CHECK (total_score BETWEEN 0 AND 100),
            incorrect_list TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_questions_block ON questions(block)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_results_name_date ON results(full_name, test_date DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_date ON results(test_date DESC)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Fresh in-memory database with the schema applied
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    setup_database(&pool).await.expect("schema");
    pool
}
