//! Ports between the services and persisted state.
//!
//! Every store must tolerate concurrent writers from overlapping invocations;
//! writes that may be repeated are upserts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::accounts::NetworkSet;
use super::alert_state::AlertState;
use super::scheduled_posts::{NewScheduledPost, OverdueBacklog};

/// Storage and connectivity failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Account ownership and linked-network lookup
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Resolve the network set used for an account. `target_set_id` selects a
    /// specific set; otherwise the account's default set is used. Returns
    /// `None` when the account or set does not exist.
    async fn network_set(
        &self,
        account_id: &str,
        target_set_id: Option<&str>,
    ) -> Result<Option<NetworkSet>, StoreError>;
}

#[async_trait]
pub trait ScheduledPostStore: Send + Sync {
    /// Insert posts with their attachments atomically, returning the new ids in order
    async fn insert_posts(&self, posts: &[NewScheduledPost]) -> Result<Vec<i64>, StoreError>;

    /// Pending posts whose target time is at or before `cutoff`: the total
    /// count plus up to `limit` of the oldest
    async fn overdue_backlog(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<OverdueBacklog, StoreError>;
}

#[async_trait]
pub trait CronRunStore: Send + Sync {
    /// Record a pending run and return its id
    async fn start_run(
        &self,
        job_name: &str,
        source: &str,
        started_at: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    async fn finish_run(
        &self,
        run_id: i64,
        success: bool,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Completion time of the most recent successful run of `job_name`
    async fn last_success(&self, job_name: &str) -> Result<Option<DateTime<Utc>>, StoreError>;
}

#[async_trait]
pub trait AlertStateStore: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Result<Option<AlertState>, StoreError>;

    async fn upsert(
        &self,
        fingerprint: &str,
        sent_at: DateTime<Utc>,
        payload: &str,
    ) -> Result<(), StoreError>;
}
