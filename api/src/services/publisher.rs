//! Multi-network publish orchestration
//!
//! One request fans out to every requested network. Media is transferred once
//! and shared; each network then gets a primary attempt and, when eligible, a
//! single text-only retry. Per-network failures never fail the call; only
//! request validation and the account lookup do.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::domain::scheduled_posts::{MediaProcessingStatus, NewMediaAttachment, NewScheduledPost};
use crate::domain::{AccountDirectory, ScheduledPostStore, StoreError};
use crate::models::{MediaClass, Network, NetworkStatus, PublishAt};
use crate::services::gateway::{DraftPost, DraftRequest, GatewayError, PublishingGateway};
use crate::services::media::{
    self, EffectiveConstraints, MediaPipeline, MediaTransferError, UploadedMedia,
};

const NOT_CONNECTED: &str = "not connected";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{0}")]
    Validation(String),
    #[error("account or network set not found: {0}")]
    AccountNotFound(String),
    #[error("storage error: {0}")]
    Infrastructure(#[from] StoreError),
}

impl From<MediaTransferError> for PublishError {
    fn from(e: MediaTransferError) -> Self {
        PublishError::Validation(e.to_string())
    }
}

// ============== Request ==============

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostInput {
    pub text: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub account_id: String,
    #[serde(default)]
    pub target_network_set_id: Option<String>,
    pub networks: Vec<String>,
    pub posts: Vec<PostInput>,
    pub publish_at: String,
    #[serde(default)]
    pub fallback_to_text_only: bool,
}

/// A request that passed boundary validation
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub account_id: String,
    pub target_network_set_id: Option<String>,
    /// Deduplicated, in request order
    pub networks: Vec<Network>,
    pub posts: Vec<PostInput>,
    pub publish_at: PublishAt,
    pub fallback_to_text_only: bool,
}

impl ValidatedRequest {
    fn media_urls(&self) -> Vec<Vec<String>> {
        self.posts.iter().map(|p| p.media_urls.clone()).collect()
    }

    fn has_media(&self) -> bool {
        self.posts.iter().any(|p| !p.media_urls.is_empty())
    }

    /// Thread texts joined into one stored body
    fn content(&self) -> String {
        self.posts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl PublishRequest {
    pub fn validate(self, now: DateTime<Utc>) -> Result<ValidatedRequest, PublishError> {
        let invalid = |msg: String| PublishError::Validation(msg);

        let account_id = self.account_id.trim().to_string();
        if account_id.is_empty() {
            return Err(invalid("accountId is required".into()));
        }

        if self.networks.is_empty() {
            return Err(invalid("at least one network is required".into()));
        }
        let mut networks = Vec::with_capacity(self.networks.len());
        for name in &self.networks {
            let network: Network = name.parse().map_err(invalid)?;
            if !networks.contains(&network) {
                networks.push(network);
            }
        }

        if self.posts.is_empty() {
            return Err(invalid("at least one post is required".into()));
        }
        for (index, post) in self.posts.iter().enumerate() {
            if post.text.trim().is_empty() {
                return Err(invalid(format!("post {} has no text", index + 1)));
            }
            for (m, raw) in post.media_urls.iter().enumerate() {
                let ok = Url::parse(raw)
                    .map(|u| matches!(u.scheme(), "http" | "https"))
                    .unwrap_or(false);
                if !ok {
                    return Err(invalid(format!(
                        "post {}, media {}: not an http(s) URL",
                        index + 1,
                        m + 1
                    )));
                }
            }
        }

        let publish_at = PublishAt::try_from(self.publish_at).map_err(invalid)?;
        if let PublishAt::At(at) = publish_at {
            if at <= now {
                return Err(invalid("publishAt must be in the future".into()));
            }
        }

        let target_network_set_id = self
            .target_network_set_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Ok(ValidatedRequest {
            account_id,
            target_network_set_id,
            networks,
            posts: self.posts,
            publish_at,
            fallback_to_text_only: self.fallback_to_text_only,
        })
    }
}

// ============== Outcome ==============

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkResult {
    pub network: Network,
    pub status: NetworkStatus,
    pub used_text_fallback: bool,
    pub draft_id: Option<String>,
    pub error: Option<String>,
}

impl NetworkResult {
    fn published(network: Network, draft_id: String) -> Self {
        Self {
            network,
            status: NetworkStatus::Published,
            used_text_fallback: false,
            draft_id: Some(draft_id),
            error: None,
        }
    }

    fn degraded(network: Network, draft_id: String, error: Option<String>) -> Self {
        Self {
            network,
            status: NetworkStatus::Degraded,
            used_text_fallback: true,
            draft_id: Some(draft_id),
            error,
        }
    }

    fn failed(network: Network, error: String) -> Self {
        Self {
            network,
            status: NetworkStatus::Failed,
            used_text_fallback: false,
            draft_id: None,
            error: Some(error),
        }
    }

    fn is_success(&self) -> bool {
        matches!(
            self.status,
            NetworkStatus::Published | NetworkStatus::Degraded
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishSummary {
    pub published: usize,
    pub degraded: usize,
    pub failed: usize,
}

impl PublishSummary {
    fn from_results(results: &[NetworkResult]) -> Self {
        let mut summary = Self::default();
        for r in results {
            match r.status {
                NetworkStatus::Published => summary.published += 1,
                NetworkStatus::Degraded => summary.degraded += 1,
                NetworkStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub network_set_id: String,
    pub available_networks: Vec<Network>,
    pub unavailable_networks: Vec<Network>,
    /// The fallback policy the request asked for
    pub fallback_to_text_only: bool,
    /// Whether the primary attempts went out text-only because media failed
    pub text_fallback_applied: bool,
    pub media_upload_error: Option<String>,
    pub persistence_error: Option<String>,
    pub summary: PublishSummary,
    pub results: Vec<NetworkResult>,
}

// ============== Attempt state machine ==============

/// What every available network's primary attempt carries
enum PrimaryPayload {
    /// No media was requested
    TextOnly,
    WithMedia(Vec<Vec<UploadedMedia>>),
    /// Media failed and the fallback policy allowed text-only
    TextFallback,
    /// Media failed and fallback is disabled: nothing to submit
    MediaFailed(String),
}

impl PrimaryPayload {
    fn retry_eligible(&self, fallback_enabled: bool) -> bool {
        fallback_enabled && matches!(self, PrimaryPayload::WithMedia(_))
    }
}

enum AttemptState {
    Primary,
    Retry { primary_error: String },
    Done(NetworkResult),
}

fn draft_posts(posts: &[PostInput], media: Option<&[Vec<UploadedMedia>]>) -> Vec<DraftPost> {
    posts
        .iter()
        .enumerate()
        .map(|(index, post)| DraftPost {
            text: post.text.clone(),
            media_ids: media
                .and_then(|m| m.get(index))
                .map(|items| items.iter().map(|u| u.media_id.clone()).collect())
                .unwrap_or_default(),
        })
        .collect()
}

#[derive(Clone)]
pub struct Publisher {
    directory: Arc<dyn AccountDirectory>,
    posts: Arc<dyn ScheduledPostStore>,
    gateway: Arc<dyn PublishingGateway>,
    media: MediaPipeline,
}

impl Publisher {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        posts: Arc<dyn ScheduledPostStore>,
        gateway: Arc<dyn PublishingGateway>,
        media: MediaPipeline,
    ) -> Self {
        Self {
            directory,
            posts,
            gateway,
            media,
        }
    }

    pub async fn publish(&self, request: PublishRequest) -> Result<PublishOutcome, PublishError> {
        let now = Utc::now();
        let request = request.validate(now)?;
        self.publish_validated(request, now).await
    }

    pub async fn publish_validated(
        &self,
        request: ValidatedRequest,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome, PublishError> {
        let set = self
            .directory
            .network_set(&request.account_id, request.target_network_set_id.as_deref())
            .await?
            .ok_or_else(|| PublishError::AccountNotFound(request.account_id.clone()))?;

        let (available, unavailable): (Vec<Network>, Vec<Network>) = request
            .networks
            .iter()
            .copied()
            .partition(|n| set.networks.contains(n));

        let constraints = EffectiveConstraints::for_networks(&available);
        let media_urls = request.media_urls();
        if let Some(c) = &constraints {
            media::validate_attachment_counts(&media_urls, c)?;
        }

        let mut media_upload_error = None;
        let primary = match &constraints {
            Some(c) if request.has_media() => {
                match self.media.transfer(&set.id, &media_urls, c).await {
                    Ok(uploaded) => PrimaryPayload::WithMedia(uploaded),
                    Err(e) => {
                        let message = e.to_string();
                        media_upload_error = Some(message.clone());
                        if request.fallback_to_text_only {
                            tracing::warn!(
                                network_set = %set.id,
                                "media transfer failed, publishing text-only: {}",
                                message
                            );
                            PrimaryPayload::TextFallback
                        } else {
                            tracing::warn!(network_set = %set.id, "media transfer failed: {}", message);
                            PrimaryPayload::MediaFailed(message)
                        }
                    }
                }
            }
            _ => PrimaryPayload::TextOnly,
        };

        let attempts = join_all(
            available
                .iter()
                .map(|network| self.run_network(*network, &set.id, &request, &primary)),
        )
        .await;
        let mut by_network: HashMap<Network, NetworkResult> =
            attempts.into_iter().map(|r| (r.network, r)).collect();

        let results: Vec<NetworkResult> = request
            .networks
            .iter()
            .map(|network| {
                by_network
                    .remove(network)
                    .unwrap_or_else(|| NetworkResult::failed(*network, NOT_CONNECTED.to_string()))
            })
            .collect();

        let summary = PublishSummary::from_results(&results);
        let persistence_error = self
            .persist(&request, &set.id, &results, &primary, now)
            .await
            .err()
            .map(|e| e.to_string());

        tracing::info!(
            account_id = %request.account_id,
            network_set = %set.id,
            published = summary.published,
            degraded = summary.degraded,
            failed = summary.failed,
            "publish finished"
        );

        Ok(PublishOutcome {
            network_set_id: set.id,
            available_networks: available,
            unavailable_networks: unavailable,
            fallback_to_text_only: request.fallback_to_text_only,
            text_fallback_applied: matches!(primary, PrimaryPayload::TextFallback),
            media_upload_error,
            persistence_error,
            summary,
            results,
        })
    }

    /// Primary attempt, then at most one text-only retry
    async fn run_network(
        &self,
        network: Network,
        set_id: &str,
        request: &ValidatedRequest,
        primary: &PrimaryPayload,
    ) -> NetworkResult {
        let mut state = AttemptState::Primary;

        loop {
            state = match state {
                AttemptState::Primary => {
                    let posts = match primary {
                        PrimaryPayload::MediaFailed(message) => {
                            return NetworkResult::failed(network, message.clone());
                        }
                        PrimaryPayload::WithMedia(uploaded) => {
                            draft_posts(&request.posts, Some(uploaded.as_slice()))
                        }
                        PrimaryPayload::TextOnly | PrimaryPayload::TextFallback => {
                            draft_posts(&request.posts, None)
                        }
                    };

                    match self.submit(network, set_id, posts, request.publish_at).await {
                        Ok(draft_id) if matches!(primary, PrimaryPayload::TextFallback) => {
                            AttemptState::Done(NetworkResult::degraded(network, draft_id, None))
                        }
                        Ok(draft_id) => {
                            AttemptState::Done(NetworkResult::published(network, draft_id))
                        }
                        Err(e) if primary.retry_eligible(request.fallback_to_text_only) => {
                            tracing::warn!(%network, "publish with media failed, retrying text-only: {}", e);
                            AttemptState::Retry {
                                primary_error: e.to_string(),
                            }
                        }
                        Err(e) => AttemptState::Done(NetworkResult::failed(network, e.to_string())),
                    }
                }
                AttemptState::Retry { primary_error } => {
                    let posts = draft_posts(&request.posts, None);
                    match self.submit(network, set_id, posts, request.publish_at).await {
                        Ok(draft_id) => AttemptState::Done(NetworkResult::degraded(
                            network,
                            draft_id,
                            Some(primary_error),
                        )),
                        Err(e) => AttemptState::Done(NetworkResult::failed(
                            network,
                            format!("{}; text-only retry: {}", primary_error, e),
                        )),
                    }
                }
                AttemptState::Done(result) => {
                    match result.status {
                        NetworkStatus::Failed => tracing::error!(
                            %network,
                            error = result.error.as_deref().unwrap_or_default(),
                            "publish failed"
                        ),
                        NetworkStatus::Degraded => tracing::warn!(%network, "published text-only"),
                        NetworkStatus::Published => tracing::info!(%network, "published"),
                    }
                    return result;
                }
            };
        }
    }

    async fn submit(
        &self,
        network: Network,
        set_id: &str,
        posts: Vec<DraftPost>,
        publish_at: PublishAt,
    ) -> Result<String, GatewayError> {
        let draft = DraftRequest::for_network(network, posts, publish_at);
        let response = self.gateway.create_draft(set_id, &draft).await?;
        Ok(response.draft_ref())
    }

    /// One record per published or degraded network. Failures here are reported, never unwound.
    async fn persist(
        &self,
        request: &ValidatedRequest,
        set_id: &str,
        results: &[NetworkResult],
        primary: &PrimaryPayload,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let records: Vec<NewScheduledPost> = results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| NewScheduledPost {
                account_id: request.account_id.clone(),
                network_set_id: set_id.to_string(),
                network: r.network,
                content: request.content(),
                status: request.publish_at.post_status(),
                scheduled_at: request.publish_at.resolve(now),
                draft_ref: r.draft_id.clone(),
                media: attachments(request, primary, r.used_text_fallback),
            })
            .collect();

        if records.is_empty() {
            return Ok(());
        }

        match self.posts.insert_posts(&records).await {
            Ok(ids) => {
                tracing::debug!(count = ids.len(), "scheduled posts recorded");
                Ok(())
            }
            Err(e) => {
                tracing::error!(account_id = %request.account_id, "failed to record scheduled posts: {}", e);
                Err(e)
            }
        }
    }
}

/// Every requested URL in order; skipped when the post went out text-only
fn attachments(
    request: &ValidatedRequest,
    primary: &PrimaryPayload,
    used_text_fallback: bool,
) -> Vec<NewMediaAttachment> {
    let uploaded = match primary {
        PrimaryPayload::WithMedia(uploaded) => Some(uploaded),
        _ => None,
    };
    let processing_status = if uploaded.is_some() && !used_text_fallback {
        MediaProcessingStatus::Ready
    } else {
        MediaProcessingStatus::Skipped
    };

    request
        .posts
        .iter()
        .enumerate()
        .flat_map(|(p, post)| {
            post.media_urls
                .iter()
                .enumerate()
                .map(move |(m, url)| (p, m, url))
        })
        .enumerate()
        .map(|(position, (p, m, url))| {
            let media_type = uploaded
                .and_then(|u| u.get(p)?.get(m))
                .map(|u| u.kind.class())
                .or_else(|| media::resolve_media_kind(None, url).map(|k| k.class()))
                .unwrap_or(MediaClass::Image);
            NewMediaAttachment {
                url: url.clone(),
                media_type,
                position: position as i32,
                processing_status,
            }
        })
        .collect()
}
