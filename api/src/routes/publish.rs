//! Publish entrypoint: fan one post or thread out to the requested networks

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::post,
};
use serde::Serialize;
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

use crate::AppState;
use crate::config::RateLimitConfig;
use crate::services::error::ApiError;
use crate::services::publisher::{PublishOutcome, PublishRequest};

pub fn routes(rate: RateLimitConfig) -> Router<Arc<AppState>> {
    let router = Router::new().route("/publish", post(publish));

    // Per client IP; X-Forwarded-For first, then the peer address
    let Some(rate_limit_config) = GovernorConfigBuilder::default()
        .per_second(rate.per_second)
        .burst_size(rate.burst)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
    else {
        tracing::warn!(
            per_second = rate.per_second,
            burst = rate.burst,
            "invalid publish rate limit, serving /publish unthrottled"
        );
        return router;
    };

    router.layer(GovernorLayer {
        config: rate_limit_config.into(),
    })
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub success: bool,
    pub data: PublishOutcome,
}

/// POST /publish
///
/// Validation problems are a 400; per-network failures are reported inside a
/// successful response.
async fn publish(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<PublishResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let publisher = state.publisher.as_ref().ok_or_else(|| {
        tracing::error!("publish requested but storage is not configured");
        ApiError::storage_not_configured()
    })?;

    let outcome = publisher.publish(request).await?;

    Ok(Json(PublishResponse {
        success: true,
        data: outcome,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Network;
    use crate::services::media::{MediaPipeline, PollPolicy};
    use crate::services::publisher::Publisher;
    use crate::test_support::{FakeDirectory, FakeGateway, FakePostStore};
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use reqwest::Client;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    const RATE: RateLimitConfig = RateLimitConfig {
        per_second: 1,
        burst: 100,
    };

    fn state(store: FakePostStore) -> Arc<AppState> {
        let gateway = Arc::new(FakeGateway::new());
        let directory = Arc::new(
            FakeDirectory::new().with_account("acct-1", "set-1", &[Network::X, Network::Bluesky]),
        );
        let media = MediaPipeline::new(
            Client::new(),
            gateway.clone(),
            PollPolicy {
                attempts: 1,
                delay: Duration::from_millis(1),
            },
        );
        Arc::new(AppState {
            publisher: Some(Publisher::new(directory, Arc::new(store), gateway, media)),
            ..AppState::default()
        })
    }

    async fn post_json(state: Arc<AppState>, body: Value) -> (StatusCode, Value) {
        let response = routes(RATE)
            .with_state(state)
            .oneshot(
                Request::post("/publish")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header("x-forwarded-for", "203.0.113.7")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_publish_text_thread() {
        let (status, body) = post_json(
            state(FakePostStore::new()),
            json!({
                "accountId": "acct-1",
                "networks": ["x", "bluesky"],
                "posts": [{ "text": "hello" }, { "text": "world" }],
                "publishAt": "now"
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["summary"]["published"], 2);
        assert_eq!(body["data"]["results"][0]["network"], "x");
        assert_eq!(body["data"]["results"][1]["status"], "published");
        assert_eq!(body["data"]["fallbackToTextOnly"], false);
        assert_eq!(body["data"]["textFallbackApplied"], false);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_still_success() {
        let (status, body) = post_json(
            state(FakePostStore::new().failing_inserts()),
            json!({
                "accountId": "acct-1",
                "networks": ["x", "bluesky"],
                "posts": [{ "text": "hello" }],
                "publishAt": "now"
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["summary"]["published"], 2);
        assert!(body["data"]["persistenceError"].is_string());
    }

    #[tokio::test]
    async fn test_validation_error_is_400() {
        let (status, body) = post_json(
            state(FakePostStore::new()),
            json!({
                "accountId": "acct-1",
                "networks": ["myspace"],
                "posts": [{ "text": "hello" }],
                "publishAt": "now"
            }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "success": false, "error": "unsupported network: myspace" }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let (status, body) = post_json(state(FakePostStore::new()), json!({ "accountId": 7 })).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_unknown_account_is_404() {
        let (status, _) = post_json(
            state(FakePostStore::new()),
            json!({
                "accountId": "nobody",
                "networks": ["x"],
                "posts": [{ "text": "hello" }],
                "publishAt": "now"
            }),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_storage_is_500() {
        let (status, body) = post_json(
            Arc::new(AppState::default()),
            json!({
                "accountId": "acct-1",
                "networks": ["x"],
                "posts": [{ "text": "hello" }],
                "publishAt": "now"
            }),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "storage is not configured");
    }
}
