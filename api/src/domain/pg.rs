//! Postgres implementation of the persistence ports

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::Network;

use super::accounts::{self, NetworkSet};
use super::alert_state::{self, AlertState};
use super::cron_runs;
use super::ports::{AccountDirectory, AlertStateStore, CronRunStore, ScheduledPostStore, StoreError};
use super::scheduled_posts::{self, NewScheduledPost, OverdueBacklog};

/// One pool shared by every port, constructed once per process
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountDirectory for PgStore {
    async fn network_set(
        &self,
        account_id: &str,
        target_set_id: Option<&str>,
    ) -> Result<Option<NetworkSet>, StoreError> {
        let Some(set_id) =
            accounts::find_network_set_id(&self.pool, account_id, target_set_id).await?
        else {
            return Ok(None);
        };

        let networks = accounts::list_connected_networks(&self.pool, &set_id)
            .await?
            .into_iter()
            .filter_map(|name| match name.parse::<Network>() {
                Ok(network) => Some(network),
                Err(e) => {
                    tracing::warn!(network_set = %set_id, "skipping connection: {}", e);
                    None
                }
            })
            .collect();

        Ok(Some(NetworkSet {
            id: set_id,
            networks,
        }))
    }
}

#[async_trait]
impl ScheduledPostStore for PgStore {
    async fn insert_posts(&self, posts: &[NewScheduledPost]) -> Result<Vec<i64>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(posts.len());

        for post in posts {
            let id = scheduled_posts::insert_scheduled_post(&mut *tx, post).await?;
            for media in &post.media {
                scheduled_posts::insert_media_attachment(&mut *tx, id, media).await?;
            }
            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn overdue_backlog(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<OverdueBacklog, StoreError> {
        let count = scheduled_posts::count_overdue(&self.pool, cutoff).await?;
        let oldest = if count > 0 {
            scheduled_posts::list_oldest_overdue(&self.pool, cutoff, limit).await?
        } else {
            Vec::new()
        };
        Ok(OverdueBacklog { count, oldest })
    }
}

#[async_trait]
impl CronRunStore for PgStore {
    async fn start_run(
        &self,
        job_name: &str,
        source: &str,
        started_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        Ok(cron_runs::insert_run(&self.pool, job_name, source, started_at).await?)
    }

    async fn finish_run(
        &self,
        run_id: i64,
        success: bool,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Ok(cron_runs::finish_run(&self.pool, run_id, success, error_message, finished_at).await?)
    }

    async fn last_success(&self, job_name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(cron_runs::last_success(&self.pool, job_name).await?)
    }
}

#[async_trait]
impl AlertStateStore for PgStore {
    async fn get(&self, fingerprint: &str) -> Result<Option<AlertState>, StoreError> {
        Ok(alert_state::get_alert_state(&self.pool, fingerprint).await?)
    }

    async fn upsert(
        &self,
        fingerprint: &str,
        sent_at: DateTime<Utc>,
        payload: &str,
    ) -> Result<(), StoreError> {
        Ok(alert_state::upsert_alert_state(&self.pool, fingerprint, sent_at, payload).await?)
    }
}
