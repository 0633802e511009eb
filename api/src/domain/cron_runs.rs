//! Cron run domain - DB queries for job run records
//!
//! A run is inserted when a job starts (`finished_at` and `success` NULL) and
//! finalized exactly once when it ends.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

/// Insert a pending run record
pub async fn insert_run<'e, E>(
    executor: E,
    job_name: &str,
    source: &str,
    started_at: DateTime<Utc>,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        INSERT INTO cron_runs (job_name, source, started_at)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(job_name)
    .bind(source)
    .bind(started_at)
    .fetch_one(executor)
    .await
}

/// Finalize a run with its outcome
pub async fn finish_run<'e, E>(
    executor: E,
    run_id: i64,
    success: bool,
    error_message: Option<&str>,
    finished_at: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE cron_runs
        SET success = $2, error_message = $3, finished_at = $4
        WHERE id = $1
        "#,
    )
    .bind(run_id)
    .bind(success)
    .bind(error_message)
    .bind(finished_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Most recent successful completion of a job
pub async fn last_success<'e, E>(
    executor: E,
    job_name: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        SELECT MAX(finished_at) FROM cron_runs
        WHERE job_name = $1 AND success = TRUE
        "#,
    )
    .bind(job_name)
    .fetch_one(executor)
    .await
}
