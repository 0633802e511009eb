//! Shared data models used across modules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};
use std::fmt;
use std::str::FromStr;

const MB: usize = 1024 * 1024;

/// An external network reachable through a linked connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    X,
    Linkedin,
    Threads,
    Bluesky,
    Mastodon,
}

impl Network {
    pub const ALL: [Network; 5] = [
        Network::X,
        Network::Linkedin,
        Network::Threads,
        Network::Bluesky,
        Network::Mastodon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::X => "x",
            Network::Linkedin => "linkedin",
            Network::Threads => "threads",
            Network::Bluesky => "bluesky",
            Network::Mastodon => "mastodon",
        }
    }

    /// Hard limits the network enforces on attachments
    pub fn constraints(&self) -> NetworkConstraints {
        match self {
            Network::X => NetworkConstraints {
                max_media: 4,
                image_limit: 5 * MB,
                gif_limit: 15 * MB,
                video_limit: 512 * MB,
                disallowed: &[],
                video_exclusive: true,
            },
            Network::Linkedin => NetworkConstraints {
                max_media: 9,
                image_limit: 5 * MB,
                gif_limit: 5 * MB,
                video_limit: 200 * MB,
                disallowed: &[MediaKind::Webm],
                video_exclusive: true,
            },
            Network::Threads => NetworkConstraints {
                max_media: 10,
                image_limit: 8 * MB,
                gif_limit: 8 * MB,
                video_limit: 1024 * MB,
                disallowed: &[MediaKind::Webm],
                video_exclusive: false,
            },
            Network::Bluesky => NetworkConstraints {
                max_media: 4,
                image_limit: 1_000_000,
                gif_limit: 1_000_000,
                video_limit: 50 * MB,
                disallowed: &[MediaKind::Webm, MediaKind::Quicktime],
                video_exclusive: true,
            },
            Network::Mastodon => NetworkConstraints {
                max_media: 4,
                image_limit: 16 * MB,
                gif_limit: 16 * MB,
                video_limit: 99 * MB,
                disallowed: &[],
                video_exclusive: false,
            },
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Network::ALL
            .into_iter()
            .find(|n| n.as_str() == normalized)
            .ok_or_else(|| format!("unsupported network: {}", s))
    }
}

/// Per-network attachment limits
#[derive(Debug, Clone, Copy)]
pub struct NetworkConstraints {
    pub max_media: usize,
    pub image_limit: usize,
    pub gif_limit: usize,
    pub video_limit: usize,
    pub disallowed: &'static [MediaKind],
    /// A video must be the only attachment of its post
    pub video_exclusive: bool,
}

/// Concrete media type resolved from a content type or file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Jpeg,
    Png,
    Webp,
    Gif,
    Mp4,
    Quicktime,
    Webm,
}

impl MediaKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            MediaKind::Jpeg => "image/jpeg",
            MediaKind::Png => "image/png",
            MediaKind::Webp => "image/webp",
            MediaKind::Gif => "image/gif",
            MediaKind::Mp4 => "video/mp4",
            MediaKind::Quicktime => "video/quicktime",
            MediaKind::Webm => "video/webm",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Jpeg => "jpg",
            MediaKind::Png => "png",
            MediaKind::Webp => "webp",
            MediaKind::Gif => "gif",
            MediaKind::Mp4 => "mp4",
            MediaKind::Quicktime => "mov",
            MediaKind::Webm => "webm",
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(MediaKind::Jpeg),
            "image/png" => Some(MediaKind::Png),
            "image/webp" => Some(MediaKind::Webp),
            "image/gif" => Some(MediaKind::Gif),
            "video/mp4" => Some(MediaKind::Mp4),
            "video/quicktime" => Some(MediaKind::Quicktime),
            "video/webm" => Some(MediaKind::Webm),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(MediaKind::Jpeg),
            "png" => Some(MediaKind::Png),
            "webp" => Some(MediaKind::Webp),
            "gif" => Some(MediaKind::Gif),
            "mp4" | "m4v" => Some(MediaKind::Mp4),
            "mov" => Some(MediaKind::Quicktime),
            "webm" => Some(MediaKind::Webm),
            _ => None,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MediaKind::Mp4 | MediaKind::Quicktime | MediaKind::Webm)
    }

    /// Still images that can be re-encoded to fit a size ceiling
    pub fn is_compressible(&self) -> bool {
        matches!(self, MediaKind::Jpeg | MediaKind::Png | MediaKind::Webp)
    }

    pub fn class(&self) -> MediaClass {
        if self.is_video() {
            MediaClass::Video
        } else {
            MediaClass::Image
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.content_type())
    }
}

/// Coarse media type stored with attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaClass {
    Image,
    Video,
}

impl MediaClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaClass::Image => "image",
            MediaClass::Video => "video",
        }
    }
}

/// Lifecycle status of a scheduled post
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
    Retrying,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::Retrying => "retrying",
            PostStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PostStatus::Draft),
            "scheduled" => Some(PostStatus::Scheduled),
            "published" => Some(PostStatus::Published),
            "retrying" => Some(PostStatus::Retrying),
            "failed" => Some(PostStatus::Failed),
            _ => None,
        }
    }

    /// Statuses that still expect a publish to happen
    pub fn pending() -> [PostStatus; 2] {
        [PostStatus::Scheduled, PostStatus::Retrying]
    }
}

impl Type<Postgres> for PostStatus {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for PostStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as Decode<Postgres>>::decode(value)?;
        PostStatus::parse(&s).ok_or_else(|| format!("unknown post status: {}", s).into())
    }
}

impl Encode<'_, Postgres> for PostStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <String as Encode<Postgres>>::encode_by_ref(&self.as_str().to_owned(), buf)
    }
}

/// When a post should go out: immediately or at a future instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PublishAt {
    Now,
    At(DateTime<Utc>),
}

impl PublishAt {
    /// The instant recorded locally for this publish
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            PublishAt::Now => now,
            PublishAt::At(at) => *at,
        }
    }

    /// Local status a successful publish lands in
    pub fn post_status(&self) -> PostStatus {
        match self {
            PublishAt::Now => PostStatus::Published,
            PublishAt::At(_) => PostStatus::Scheduled,
        }
    }
}

impl TryFrom<String> for PublishAt {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().eq_ignore_ascii_case("now") {
            return Ok(PublishAt::Now);
        }
        DateTime::parse_from_rfc3339(value.trim())
            .map(|dt| PublishAt::At(dt.with_timezone(&Utc)))
            .map_err(|e| format!("publishAt must be \"now\" or an ISO-8601 datetime: {}", e))
    }
}

impl From<PublishAt> for String {
    fn from(value: PublishAt) -> Self {
        match value {
            PublishAt::Now => "now".to_string(),
            PublishAt::At(at) => at.to_rfc3339(),
        }
    }
}

/// Outcome of one network's submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Published,
    Degraded,
    Failed,
}
