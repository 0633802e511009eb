//! Chat-ops alert delivery, deduplicated by fingerprint.
//!
//! An alert with a given fingerprint is delivered at most once per cooldown
//! window. Dedup state lives in storage so it holds across invocations.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::constants::ALERT_DESCRIPTION_LIMIT;
use crate::domain::{AlertStateStore, StoreError};

const FINGERPRINT_SEPARATOR: &str = "|";

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("webhook rejected alert with {status}: {body}")]
    Delivery { status: u16, body: String },
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("alert state: {0}")]
    Store(#[from] StoreError),
}

/// Stable identity of an alert condition. Order of `parts` matters.
pub fn fingerprint<S: AsRef<str>>(parts: &[S]) -> String {
    let joined = parts
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<&str>>()
        .join(FINGERPRINT_SEPARATOR);
    hex::encode(Sha256::digest(joined.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Embed side-bar color
    pub fn color(&self) -> u32 {
        match self {
            Severity::Info => 0x3498db,
            Severity::Warning => 0xf1c40f,
            Severity::Critical => 0xe74c3c,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub details: Vec<String>,
    pub metadata: Vec<(String, String)>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(title: impl Into<String>, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
            details: Vec::new(),
            metadata: Vec::new(),
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    MissingWebhook,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlertOutcome {
    pub sent: bool,
    pub reason: Option<SkipReason>,
}

impl AlertOutcome {
    fn sent() -> Self {
        Self {
            sent: true,
            reason: None,
        }
    }

    fn skipped(reason: SkipReason) -> Self {
        Self {
            sent: false,
            reason: Some(reason),
        }
    }
}

/// Description, bulleted details, then bold metadata pairs; capped at the embed limit
pub fn render_body(alert: &Alert) -> String {
    let mut body = alert.description.clone();

    for detail in &alert.details {
        body.push_str("\n- ");
        body.push_str(detail);
    }

    if !alert.metadata.is_empty() {
        body.push('\n');
        for (key, value) in &alert.metadata {
            body.push_str(&format!("\n**{}**: {}", key, value));
        }
    }

    if body.chars().count() > ALERT_DESCRIPTION_LIMIT {
        body = body.chars().take(ALERT_DESCRIPTION_LIMIT).collect();
    }
    body
}

#[derive(Serialize)]
struct Embed<'a> {
    title: &'a str,
    description: &'a str,
    color: u32,
    timestamp: String,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    embeds: [Embed<'a>; 1],
}

#[derive(Clone)]
pub struct AlertDispatcher {
    http: Client,
    webhook_url: Option<String>,
    cooldown: Duration,
    state: Arc<dyn AlertStateStore>,
}

impl AlertDispatcher {
    pub fn new(
        http: Client,
        webhook_url: Option<String>,
        cooldown_minutes: i64,
        state: Arc<dyn AlertStateStore>,
    ) -> Self {
        Self {
            http,
            webhook_url,
            cooldown: Duration::minutes(cooldown_minutes),
            state,
        }
    }

    /// Deliver unless no webhook is configured or the fingerprint is cooling down.
    /// Delivery failures are returned, never swallowed.
    pub async fn dispatch_at(
        &self,
        fingerprint: &str,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> Result<AlertOutcome, AlertError> {
        let Some(webhook_url) = self.webhook_url.as_deref() else {
            tracing::warn!(fingerprint, title = %alert.title, "alert skipped: no webhook configured");
            return Ok(AlertOutcome::skipped(SkipReason::MissingWebhook));
        };

        if let Some(previous) = self.state.get(fingerprint).await? {
            if now - previous.last_sent_at < self.cooldown {
                tracing::info!(
                    fingerprint,
                    last_sent_at = %previous.last_sent_at,
                    "alert suppressed by cooldown"
                );
                return Ok(AlertOutcome::skipped(SkipReason::Cooldown));
            }
        }

        let body = render_body(alert);
        let message = WebhookMessage {
            embeds: [Embed {
                title: &alert.title,
                description: &body,
                color: alert.severity.color(),
                timestamp: alert.timestamp.unwrap_or(now).to_rfc3339(),
            }],
        };

        let resp = self.http.post(webhook_url).json(&message).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AlertError::Delivery {
                status: status.as_u16(),
                body,
            });
        }

        self.state.upsert(fingerprint, now, &body).await?;
        tracing::info!(fingerprint, severity = ?alert.severity, "alert delivered");

        Ok(AlertOutcome::sent())
    }
}
