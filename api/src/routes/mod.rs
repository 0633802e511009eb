pub mod cron;
pub mod health;
pub mod publish;

use axum::Router;
use std::sync::Arc;

use crate::AppState;
use crate::config::RateLimitConfig;

/// Build all routes for the API
pub fn build_routes(publish_rate: RateLimitConfig) -> Router<Arc<AppState>> {
    Router::new()
        .merge(publish::routes(publish_rate))
        .merge(cron::routes())
        .merge(health::routes())
}
