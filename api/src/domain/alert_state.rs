//! Alert dedup state - DB queries keyed by fingerprint

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

/// Last delivery of one alert identity
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AlertState {
    pub fingerprint: String,
    pub last_sent_at: DateTime<Utc>,
    pub last_payload: String,
}

pub async fn get_alert_state<'e, E>(
    executor: E,
    fingerprint: &str,
) -> Result<Option<AlertState>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT fingerprint, last_sent_at, last_payload
        FROM alert_state WHERE fingerprint = $1
        "#,
    )
    .bind(fingerprint)
    .fetch_optional(executor)
    .await
}

/// Record a delivery; concurrent senders converge on the latest write
pub async fn upsert_alert_state<'e, E>(
    executor: E,
    fingerprint: &str,
    sent_at: DateTime<Utc>,
    payload: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO alert_state (fingerprint, last_sent_at, last_payload)
        VALUES ($1, $2, $3)
        ON CONFLICT (fingerprint) DO UPDATE SET
            last_sent_at = EXCLUDED.last_sent_at,
            last_payload = EXCLUDED.last_payload,
            updated_at = NOW()
        "#,
    )
    .bind(fingerprint)
    .bind(sent_at)
    .bind(payload)
    .execute(executor)
    .await?;
    Ok(())
}
