use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    // Every connection to an in-memory database is a separate database
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Running, completed and failed records share one table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_records (
            store TEXT NOT NULL,
            job_id TEXT NOT NULL,
            queued_time TIMESTAMP NOT NULL,
            record TEXT NOT NULL,
            PRIMARY KEY (store, job_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // The queue is one ordered JSON list, rewritten in a transaction
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_queue (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            entries TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cron_schedules (
            worker_id TEXT PRIMARY KEY,
            record TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_records_queued_time ON job_records(store, queued_time)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
