//! Client for the publishing gateway that owns every linked network connection.
//!
//! Media goes up in two steps (request an upload slot, PUT the bytes to it)
//! and is then polled until the gateway reports it ready. Posts are submitted
//! as drafts, either published immediately or scheduled.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Network, PublishAt};

const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse {what} response: {reason}")]
    Decode { what: &'static str, reason: String },
}

/// Where to PUT the bytes of one media object
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadSlot {
    pub media_id: String,
    pub upload_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaState {
    Processing,
    Ready,
    Error,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediaStatus {
    pub media_id: String,
    pub status: MediaState,
    #[serde(default)]
    pub error_reason: Option<String>,
}

/// One post of a draft; a thread has several
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftPost {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct PlatformDraft {
    enabled: bool,
    posts: Vec<DraftPost>,
}

/// A draft targeting a single network
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftRequest {
    platforms: BTreeMap<String, PlatformDraft>,
    publish_at: PublishAt,
}

impl DraftRequest {
    pub fn for_network(network: Network, posts: Vec<DraftPost>, publish_at: PublishAt) -> Self {
        let mut platforms = BTreeMap::new();
        platforms.insert(
            network.as_str().to_string(),
            PlatformDraft {
                enabled: true,
                posts,
            },
        );
        Self {
            platforms,
            publish_at,
        }
    }

    pub fn network(&self) -> Option<&str> {
        self.platforms.keys().next().map(String::as_str)
    }

    pub fn posts(&self) -> impl Iterator<Item = &DraftPost> {
        self.platforms.values().flat_map(|p| &p.posts)
    }

    pub fn has_media(&self) -> bool {
        self.posts().any(|post| !post.media_ids.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DraftResponse {
    id: serde_json::Value,
}

impl DraftResponse {
    /// Opaque reference to the created draft
    pub fn draft_ref(&self) -> String {
        match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Operations the orchestrator and media pipeline need from the gateway
#[async_trait]
pub trait PublishingGateway: Send + Sync {
    async fn create_upload_slot(
        &self,
        network_set_id: &str,
        file_name: &str,
    ) -> Result<UploadSlot, GatewayError>;

    async fn transfer(
        &self,
        slot: &UploadSlot,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), GatewayError>;

    async fn media_status(
        &self,
        network_set_id: &str,
        media_id: &str,
    ) -> Result<MediaStatus, GatewayError>;

    async fn create_draft(
        &self,
        network_set_id: &str,
        draft: &DraftRequest,
    ) -> Result<DraftResponse, GatewayError>;
}

#[derive(Clone)]
pub struct GatewayClient {
    base_url: String,
    api_key: String,
    http: Client,
}

impl GatewayClient {
    pub fn new(base_url: &str, api_key: &str, http: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    fn set_url(&self, network_set_id: &str, rest: &str) -> String {
        format!("{}/social-sets/{}/{}", self.base_url, network_set_id, rest)
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{}...", head)
    }
}

/// Read a response body, failing on non-2xx with the status and (trimmed) body
async fn read_body(resp: reqwest::Response) -> Result<String, GatewayError> {
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        return Err(GatewayError::Api {
            status: status.as_u16(),
            body: truncate_body(&text),
        });
    }

    Ok(text)
}

async fn read_json<T: DeserializeOwned>(
    resp: reqwest::Response,
    what: &'static str,
) -> Result<T, GatewayError> {
    let text = read_body(resp).await?;
    serde_json::from_str(&text).map_err(|e| GatewayError::Decode {
        what,
        reason: format!("{} - body: {}", e, truncate_body(&text)),
    })
}

#[async_trait]
impl PublishingGateway for GatewayClient {
    async fn create_upload_slot(
        &self,
        network_set_id: &str,
        file_name: &str,
    ) -> Result<UploadSlot, GatewayError> {
        let resp = self
            .http
            .post(self.set_url(network_set_id, "media/upload"))
            .header(AUTHORIZATION, self.bearer())
            .json(&serde_json::json!({ "file_name": file_name }))
            .send()
            .await?;

        read_json(resp, "upload slot").await
    }

    async fn transfer(
        &self,
        slot: &UploadSlot,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), GatewayError> {
        // Upload URLs are pre-signed; no bearer token
        let resp = self
            .http
            .put(&slot.upload_url)
            .header(CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;

        read_body(resp).await.map(|_| ())
    }

    async fn media_status(
        &self,
        network_set_id: &str,
        media_id: &str,
    ) -> Result<MediaStatus, GatewayError> {
        let resp = self
            .http
            .get(self.set_url(network_set_id, &format!("media/{}", media_id)))
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?;

        read_json(resp, "media status").await
    }

    async fn create_draft(
        &self,
        network_set_id: &str,
        draft: &DraftRequest,
    ) -> Result<DraftResponse, GatewayError> {
        tracing::debug!(
            network_set = network_set_id,
            network = draft.network().unwrap_or("unknown"),
            with_media = draft.has_media(),
            "submitting draft"
        );
        let resp = self
            .http
            .post(self.set_url(network_set_id, "drafts"))
            .header(AUTHORIZATION, self.bearer())
            .json(draft)
            .send()
            .await?;

        read_json(resp, "draft").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GatewayClient {
        GatewayClient::new(&format!("{}/v2/", server.uri()), "key-123", Client::new())
    }

    #[tokio::test]
    async fn test_upload_slot_then_transfer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/social-sets/set-1/media/upload"))
            .and(header("authorization", "Bearer key-123"))
            .and(body_json(serde_json::json!({ "file_name": "a.jpg" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "media_id": "m-1",
                "upload_url": format!("{}/bucket/m-1", server.uri()),
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/bucket/m-1"))
            .and(header("content-type", "image/jpeg"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = client(&server);
        let slot = gateway.create_upload_slot("set-1", "a.jpg").await.unwrap();
        assert_eq!(slot.media_id, "m-1");

        gateway
            .transfer(&slot, Bytes::from_static(b"\xff\xd8\xff"), "image/jpeg")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_media_status_tolerates_unknown_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/social-sets/set-1/media/m-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "media_id": "m-1",
                "status": "transcoding",
            })))
            .mount(&server)
            .await;

        let status = client(&server).media_status("set-1", "m-1").await.unwrap();
        assert_eq!(status.status, MediaState::Unknown);
        assert_eq!(status.error_reason, None);
    }

    #[tokio::test]
    async fn test_create_draft_payload_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/social-sets/set-1/drafts"))
            .and(body_json(serde_json::json!({
                "platforms": {
                    "linkedin": {
                        "enabled": true,
                        "posts": [
                            { "text": "first", "media_ids": ["m-1"] },
                            { "text": "second" }
                        ]
                    }
                },
                "publish_at": "now"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": 4821 })),
            )
            .mount(&server)
            .await;

        let draft = DraftRequest::for_network(
            Network::Linkedin,
            vec![
                DraftPost {
                    text: "first".into(),
                    media_ids: vec!["m-1".into()],
                },
                DraftPost {
                    text: "second".into(),
                    media_ids: vec![],
                },
            ],
            PublishAt::Now,
        );
        assert!(draft.has_media());

        let resp = client(&server).create_draft("set-1", &draft).await.unwrap();
        assert_eq!(resp.draft_ref(), "4821");
    }

    #[tokio::test]
    async fn test_non_success_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/social-sets/set-1/drafts"))
            .respond_with(ResponseTemplate::new(422).set_body_string("media not ready"))
            .mount(&server)
            .await;

        let draft = DraftRequest::for_network(Network::X, vec![], PublishAt::Now);
        let err = client(&server)
            .create_draft("set-1", &draft)
            .await
            .unwrap_err();

        match err {
            GatewayError::Api { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body, "media not ready");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
