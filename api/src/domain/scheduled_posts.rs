//! Scheduled post domain - DB queries for posts and their media attachments
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

use crate::models::{MediaClass, Network, PostStatus};

/// A post to record after a published or degraded network result
#[derive(Debug, Clone, PartialEq)]
pub struct NewScheduledPost {
    pub account_id: String,
    pub network_set_id: String,
    pub network: Network,
    /// Thread posts joined into one body
    pub content: String,
    pub status: PostStatus,
    pub scheduled_at: DateTime<Utc>,
    pub draft_ref: Option<String>,
    pub media: Vec<NewMediaAttachment>,
}

impl NewScheduledPost {
    pub fn media_urls(&self) -> Vec<String> {
        self.media.iter().map(|m| m.url.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMediaAttachment {
    pub url: String,
    pub media_type: MediaClass,
    pub position: i32,
    pub processing_status: MediaProcessingStatus,
}

/// Whether an attachment actually went out with its post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaProcessingStatus {
    Ready,
    /// The post was published text-only
    Skipped,
}

impl MediaProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaProcessingStatus::Ready => "ready",
            MediaProcessingStatus::Skipped => "skipped",
        }
    }
}

/// A pending post past its target time
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OverdueItem {
    pub id: i64,
    pub network: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: PostStatus,
}

/// Count of overdue posts plus the oldest few
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverdueBacklog {
    pub count: i64,
    /// Ordered oldest first
    pub oldest: Vec<OverdueItem>,
}

/// Insert a scheduled post row
pub async fn insert_scheduled_post<'e, E>(
    executor: E,
    post: &NewScheduledPost,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        INSERT INTO scheduled_posts
            (account_id, network_set_id, network, content, status, scheduled_at, draft_ref, media_urls)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(&post.account_id)
    .bind(&post.network_set_id)
    .bind(post.network.as_str())
    .bind(&post.content)
    .bind(post.status)
    .bind(post.scheduled_at)
    .bind(post.draft_ref.as_deref())
    .bind(post.media_urls())
    .fetch_one(executor)
    .await
}

/// Insert one attachment of a scheduled post
pub async fn insert_media_attachment<'e, E>(
    executor: E,
    scheduled_post_id: i64,
    media: &NewMediaAttachment,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO media_attachments
            (scheduled_post_id, url, media_type, position, processing_status)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(scheduled_post_id)
    .bind(&media.url)
    .bind(media.media_type.as_str())
    .bind(media.position)
    .bind(media.processing_status.as_str())
    .execute(executor)
    .await?;
    Ok(())
}

fn pending_statuses() -> Vec<String> {
    PostStatus::pending()
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

/// Count pending posts due at or before `cutoff`
pub async fn count_overdue<'e, E>(executor: E, cutoff: DateTime<Utc>) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM scheduled_posts
        WHERE scheduled_at <= $1 AND status = ANY($2)
        "#,
    )
    .bind(cutoff)
    .bind(pending_statuses())
    .fetch_one(executor)
    .await
}

/// Oldest pending posts due at or before `cutoff`
pub async fn list_oldest_overdue<'e, E>(
    executor: E,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<OverdueItem>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, network, scheduled_at, status FROM scheduled_posts
        WHERE scheduled_at <= $1 AND status = ANY($2)
        ORDER BY scheduled_at ASC, id ASC
        LIMIT $3
        "#,
    )
    .bind(cutoff)
    .bind(pending_statuses())
    .bind(limit)
    .fetch_all(executor)
    .await
}
