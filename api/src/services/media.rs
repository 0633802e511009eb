//! Media transfer pipeline
//!
//! Runs once per publish request, shared by every target network:
//! 1. pre-flight attachment counts across all posts
//! 2. fetch every referenced URL and resolve a concrete media type
//! 3. apply network constraints, compressing oversized still images
//! 4. upload through the gateway and wait for readiness
//!
//! Any failure aborts the whole batch and names the offending item.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::join_all;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use url::Url;

use crate::constants::{MEDIA_DECODE_CAP_BYTES, MEDIA_POLL_ATTEMPTS, MEDIA_POLL_DELAY_MS};
use crate::models::{MediaKind, Network};
use crate::services::compression::{self, CompressionError};
use crate::services::gateway::{GatewayError, MediaState, PublishingGateway};

/// Position of one media URL within a request (zero-based, displayed 1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaItem {
    pub post: usize,
    pub media: usize,
}

impl fmt::Display for MediaItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "post {}, media {}", self.post + 1, self.media + 1)
    }
}

#[derive(Debug, Error)]
pub enum MediaTransferError {
    #[error("post {post} has {count} attachments but {network} allows at most {max}")]
    AttachmentLimitExceeded {
        post: usize,
        count: usize,
        max: usize,
        network: Network,
    },
    #[error("failed to fetch {item}: {reason}")]
    Fetch { item: MediaItem, reason: String },
    #[error("unsupported media type for {item}")]
    UnsupportedType { item: MediaItem },
    #[error("{item}: {kind} is not accepted by {network}")]
    Disallowed {
        item: MediaItem,
        kind: MediaKind,
        network: Network,
    },
    #[error("{item}: {kind} of {size} bytes exceeds the {limit} byte limit")]
    TooLarge {
        item: MediaItem,
        kind: MediaKind,
        size: usize,
        limit: usize,
    },
    #[error("{item}: a video must be the only attachment of its post")]
    VideoNotExclusive { item: MediaItem },
    #[error("{item}: could not compress under the {limit} byte limit: {source}")]
    Compression {
        item: MediaItem,
        limit: usize,
        #[source]
        source: CompressionError,
    },
    #[error("{item}: upload failed: {source}")]
    Upload {
        item: MediaItem,
        #[source]
        source: GatewayError,
    },
    #[error("{item}: processing failed: {reason}")]
    ProcessingFailed { item: MediaItem, reason: String },
    #[error("{item}: not ready after {attempts} status checks")]
    ProcessingTimeout { item: MediaItem, attempts: u32 },
}

/// Bounded readiness wait after an upload
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: MEDIA_POLL_ATTEMPTS,
            delay: Duration::from_millis(MEDIA_POLL_DELAY_MS),
        }
    }
}

/// The most restrictive constraints across a set of networks.
/// Each limit remembers which network imposed it.
#[derive(Debug, Clone)]
pub struct EffectiveConstraints {
    pub max_media: (usize, Network),
    pub image_limit: usize,
    pub gif_limit: usize,
    pub video_limit: usize,
    pub disallowed: Vec<(MediaKind, Network)>,
    pub video_exclusive: bool,
}

impl EffectiveConstraints {
    /// `None` when there are no networks to constrain
    pub fn for_networks(networks: &[Network]) -> Option<Self> {
        let (first, rest) = networks.split_first()?;
        let base = first.constraints();
        let mut effective = Self {
            max_media: (base.max_media, *first),
            image_limit: base.image_limit,
            gif_limit: base.gif_limit,
            video_limit: base.video_limit,
            disallowed: base.disallowed.iter().map(|k| (*k, *first)).collect(),
            video_exclusive: base.video_exclusive,
        };

        for network in rest {
            let c = network.constraints();
            if c.max_media < effective.max_media.0 {
                effective.max_media = (c.max_media, *network);
            }
            effective.image_limit = effective.image_limit.min(c.image_limit);
            effective.gif_limit = effective.gif_limit.min(c.gif_limit);
            effective.video_limit = effective.video_limit.min(c.video_limit);
            for kind in c.disallowed {
                if !effective.disallowed.iter().any(|(k, _)| k == kind) {
                    effective.disallowed.push((*kind, *network));
                }
            }
            effective.video_exclusive |= c.video_exclusive;
        }

        Some(effective)
    }

    pub fn limit_for(&self, kind: MediaKind) -> usize {
        match kind {
            MediaKind::Gif => self.gif_limit,
            k if k.is_video() => self.video_limit,
            _ => self.image_limit,
        }
    }

    /// Most bytes worth downloading for one item. Compressible images may
    /// exceed their ceiling up to the decode cap.
    pub fn fetch_cap(&self, kind: MediaKind) -> usize {
        let limit = self.limit_for(kind);
        if kind.is_compressible() {
            limit.max(MEDIA_DECODE_CAP_BYTES)
        } else {
            limit
        }
    }

    fn disallowed_by(&self, kind: MediaKind) -> Option<Network> {
        self.disallowed
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, network)| *network)
    }
}

/// Attachment counts per post, checked before anything leaves the process
pub fn validate_attachment_counts(
    posts: &[Vec<String>],
    constraints: &EffectiveConstraints,
) -> Result<(), MediaTransferError> {
    let (max, network) = constraints.max_media;
    for (index, urls) in posts.iter().enumerate() {
        if urls.len() > max {
            return Err(MediaTransferError::AttachmentLimitExceeded {
                post: index + 1,
                count: urls.len(),
                max,
                network,
            });
        }
    }
    Ok(())
}

/// Resolve a media type from the declared content type, falling back to the URL's extension
pub fn resolve_media_kind(content_type: Option<&str>, url: &str) -> Option<MediaKind> {
    if let Some(kind) = content_type.and_then(MediaKind::from_content_type) {
        return Some(kind);
    }

    let parsed = Url::parse(url).ok()?;
    let file_name = parsed.path_segments()?.last()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    MediaKind::from_extension(ext)
}

/// A media object accepted by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub media_id: String,
    pub url: String,
    pub kind: MediaKind,
}

struct Fetched {
    item: MediaItem,
    url: String,
    kind: MediaKind,
    data: Bytes,
}

struct Planned {
    item: MediaItem,
    url: String,
    kind: MediaKind,
    data: Bytes,
    /// Ceiling to compress under, when over it
    compress_to: Option<usize>,
}

#[derive(Clone)]
pub struct MediaPipeline {
    http: Client,
    gateway: Arc<dyn PublishingGateway>,
    poll: PollPolicy,
}

impl MediaPipeline {
    pub fn new(http: Client, gateway: Arc<dyn PublishingGateway>, poll: PollPolicy) -> Self {
        Self {
            http,
            gateway,
            poll,
        }
    }

    /// Upload every media URL of every post, preserving the post/media shape
    pub async fn transfer(
        &self,
        network_set_id: &str,
        posts: &[Vec<String>],
        constraints: &EffectiveConstraints,
    ) -> Result<Vec<Vec<UploadedMedia>>, MediaTransferError> {
        validate_attachment_counts(posts, constraints)?;

        let items: Vec<(MediaItem, &str)> = posts
            .iter()
            .enumerate()
            .flat_map(|(post, urls)| {
                urls.iter()
                    .enumerate()
                    .map(move |(media, url)| (MediaItem { post, media }, url.as_str()))
            })
            .collect();

        if items.is_empty() {
            return Ok(posts.iter().map(|_| Vec::new()).collect());
        }

        // Fetches run concurrently; errors are reported for the lowest item
        let fetched: Vec<Fetched> = join_all(items.iter().map(|(item, url)| {
            self.fetch(*item, url, posts[item.post].len(), constraints)
        }))
        .await
        .into_iter()
        .collect::<Result<_, _>>()?;

        let planned = plan(fetched, constraints);

        let uploaded: Vec<UploadedMedia> = join_all(
            planned
                .into_iter()
                .map(|p| self.prepare_and_upload(network_set_id, p)),
        )
        .await
        .into_iter()
        .collect::<Result<_, _>>()?;

        let mut grouped: Vec<Vec<UploadedMedia>> = posts.iter().map(|_| Vec::new()).collect();
        for ((item, _), media) in items.iter().zip(uploaded) {
            grouped[item.post].push(media);
        }

        tracing::info!(
            network_set = %network_set_id,
            count = items.len(),
            "media transferred"
        );
        Ok(grouped)
    }

    /// Fetch one item. Type and constraint checks run on the response head,
    /// and the body is read only up to the item's cap.
    async fn fetch(
        &self,
        item: MediaItem,
        url: &str,
        siblings: usize,
        constraints: &EffectiveConstraints,
    ) -> Result<Fetched, MediaTransferError> {
        let fetch_err = |reason: String| MediaTransferError::Fetch { item, reason };

        let mut resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(fetch_err(format!("HTTP {}", status.as_u16())));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let kind = resolve_media_kind(content_type, url)
            .ok_or(MediaTransferError::UnsupportedType { item })?;
        check_item(item, kind, siblings, constraints)?;

        let cap = constraints.fetch_cap(kind);
        let too_large = |size: usize| MediaTransferError::TooLarge {
            item,
            kind,
            size,
            limit: cap,
        };

        let declared = resp
            .content_length()
            .map(|len| usize::try_from(len).unwrap_or(usize::MAX));
        if let Some(len) = declared {
            if len > cap {
                return Err(too_large(len));
            }
        }

        let mut buf = BytesMut::with_capacity(declared.unwrap_or(0));
        while let Some(chunk) = resp.chunk().await.map_err(|e| fetch_err(e.to_string()))? {
            let size = buf.len() + chunk.len();
            if size > cap {
                tracing::warn!(%item, cap, "media body exceeded its cap, aborting fetch");
                return Err(too_large(size));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(Fetched {
            item,
            url: url.to_string(),
            kind,
            data: buf.freeze(),
        })
    }

    async fn prepare_and_upload(
        &self,
        network_set_id: &str,
        planned: Planned,
    ) -> Result<UploadedMedia, MediaTransferError> {
        let Planned {
            item,
            url,
            mut kind,
            mut data,
            compress_to,
        } = planned;

        if let Some(limit) = compress_to {
            let original = data.clone();
            let compressed =
                tokio::task::spawn_blocking(move || compression::compress_to_ceiling(&original, limit))
                    .await
                    .unwrap_or_else(|e| Err(CompressionError::Aborted(e.to_string())))
                    .map_err(|source| MediaTransferError::Compression {
                        item,
                        limit,
                        source,
                    })?;

            tracing::info!(
                %item,
                before = data.len(),
                after = compressed.data.len(),
                attempt = compressed.step.attempt,
                "compressed oversized image"
            );
            data = Bytes::from(compressed.data);
            kind = MediaKind::Jpeg;
        }

        let upload_err = |source: GatewayError| MediaTransferError::Upload { item, source };

        let file_name = format!(
            "post{}-media{}.{}",
            item.post + 1,
            item.media + 1,
            kind.extension()
        );
        let slot = self
            .gateway
            .create_upload_slot(network_set_id, &file_name)
            .await
            .map_err(upload_err)?;
        self.gateway
            .transfer(&slot, data, kind.content_type())
            .await
            .map_err(upload_err)?;

        self.wait_until_ready(network_set_id, &slot.media_id, item)
            .await?;

        Ok(UploadedMedia {
            media_id: slot.media_id,
            url,
            kind,
        })
    }

    async fn wait_until_ready(
        &self,
        network_set_id: &str,
        media_id: &str,
        item: MediaItem,
    ) -> Result<(), MediaTransferError> {
        for attempt in 1..=self.poll.attempts {
            let status = self
                .gateway
                .media_status(network_set_id, media_id)
                .await
                .map_err(|source| MediaTransferError::Upload { item, source })?;

            match status.status {
                MediaState::Ready => return Ok(()),
                MediaState::Error | MediaState::Failed => {
                    return Err(MediaTransferError::ProcessingFailed {
                        item,
                        reason: status
                            .error_reason
                            .unwrap_or_else(|| "reported by gateway".to_string()),
                    });
                }
                MediaState::Processing | MediaState::Unknown => {}
            }

            if attempt < self.poll.attempts {
                tokio::time::sleep(self.poll.delay).await;
            }
        }

        Err(MediaTransferError::ProcessingTimeout {
            item,
            attempts: self.poll.attempts,
        })
    }
}

/// Per-item checks that need only the resolved type
fn check_item(
    item: MediaItem,
    kind: MediaKind,
    siblings: usize,
    constraints: &EffectiveConstraints,
) -> Result<(), MediaTransferError> {
    if let Some(network) = constraints.disallowed_by(kind) {
        return Err(MediaTransferError::Disallowed {
            item,
            kind,
            network,
        });
    }

    if kind.is_video() && constraints.video_exclusive && siblings > 1 {
        return Err(MediaTransferError::VideoNotExclusive { item });
    }

    Ok(())
}

/// Decide which fetched items need compressing. Anything still over its
/// ceiling here is a compressible image, since fetch capped the rest.
fn plan(fetched: Vec<Fetched>, constraints: &EffectiveConstraints) -> Vec<Planned> {
    fetched
        .into_iter()
        .map(|f| {
            let limit = constraints.limit_for(f.kind);
            Planned {
                item: f.item,
                url: f.url,
                kind: f.kind,
                compress_to: (f.data.len() > limit).then_some(limit),
                data: f.data,
            }
        })
        .collect()
}
