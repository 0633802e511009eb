//! Scheduler-facing trigger for the publishing health watchdog

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::AppState;
use crate::services::error::{ApiError, LogErr};
use crate::services::watchdog::WatchdogReport;

const DEFAULT_SOURCE: &str = "cron";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/cron/watchdog", get(run_watchdog).post(run_watchdog))
}

#[derive(Debug, Deserialize)]
pub struct WatchdogQuery {
    pub source: Option<String>,
}

fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}

/// GET|POST /cron/watchdog?source=<tag>
async fn run_watchdog(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WatchdogQuery>,
) -> Result<Json<WatchdogReport>, ApiError> {
    if let Some(secret) = state.cron_secret.as_deref() {
        if !authorized(&headers, secret) {
            tracing::warn!("watchdog trigger rejected: bad or missing bearer token");
            return Err(ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized"));
        }
    }

    let Some(watchdog) = state.watchdog.as_ref() else {
        tracing::error!("watchdog triggered but storage is not configured");
        return Err(ApiError::storage_not_configured());
    };

    let source = query
        .source
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SOURCE.to_string());

    let report = watchdog.run(&source).await.log_500("watchdog run failed")?;

    tracing::info!(
        run_id = report.run_id,
        source = %source,
        healthy = report.healthy,
        alert_sent = report.alert_sent,
        "watchdog run finished"
    );
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::alerts::AlertDispatcher;
    use crate::services::watchdog::{Watchdog, WatchdogSettings};
    use crate::test_support::{FakeAlertState, FakeCronRuns, FakePostStore};
    use axum::{body::Body, http::Request};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use reqwest::Client;
    use serde_json::Value;
    use tower::ServiceExt;

    const SETTINGS: WatchdogSettings = WatchdogSettings {
        heartbeat_minutes: 10,
        overdue_minutes: 10,
    };

    fn state(runs: Arc<FakeCronRuns>, posts: FakePostStore, secret: Option<&str>) -> Arc<AppState> {
        let alerts = AlertDispatcher::new(Client::new(), None, 30, Arc::new(FakeAlertState::new()));
        Arc::new(AppState {
            watchdog: Some(Watchdog::new(runs, Arc::new(posts), alerts, SETTINGS)),
            cron_secret: secret.map(str::to_string),
            ..AppState::default()
        })
    }

    async fn call(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = routes().with_state(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_healthy_run() {
        let runs = Arc::new(FakeCronRuns::new().with_last_success(Utc::now()));
        let (status, body) = call(
            state(runs.clone(), FakePostStore::new(), None),
            Request::get("/cron/watchdog").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["healthy"], true);
        assert_eq!(body["alertSent"], false);

        let recorded = runs.runs();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].source, "cron");
        assert_eq!(recorded[0].success, Some(true));
    }

    #[tokio::test]
    async fn test_stale_heartbeat_without_webhook() {
        let runs = Arc::new(FakeCronRuns::new());
        let (status, body) = call(
            state(runs, FakePostStore::new(), None),
            Request::post("/cron/watchdog?source=manual")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], false);
        assert_eq!(body["issues"], serde_json::json!(["publish_heartbeat_stale"]));
        assert_eq!(body["alertReason"], "missing-webhook");
    }

    #[tokio::test]
    async fn test_secret_required() {
        let runs = Arc::new(FakeCronRuns::new());
        let (status, body) = call(
            state(runs.clone(), FakePostStore::new(), Some("s3cret")),
            Request::get("/cron/watchdog")
                .header(AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert!(runs.runs().is_empty());
    }

    #[tokio::test]
    async fn test_secret_accepted() {
        let runs = Arc::new(FakeCronRuns::new().with_last_success(Utc::now()));
        let (status, _) = call(
            state(runs.clone(), FakePostStore::new(), Some("s3cret")),
            Request::get("/cron/watchdog?source=ops")
                .header(AUTHORIZATION, "Bearer s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(runs.runs()[0].source, "ops");
    }

    #[tokio::test]
    async fn test_storage_failure_is_500_and_run_finalized() {
        let runs = Arc::new(FakeCronRuns::new().with_last_success(Utc::now()));
        let (status, body) = call(
            state(runs.clone(), FakePostStore::new().failing_backlog(), None),
            Request::get("/cron/watchdog").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "watchdog run failed");

        let recorded = runs.runs();
        assert_eq!(recorded[0].success, Some(false));
        assert!(recorded[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_missing_storage_is_500() {
        let (status, body) = call(
            Arc::new(AppState::default()),
            Request::get("/cron/watchdog").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "storage is not configured");
    }
}
