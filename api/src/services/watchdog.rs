//! Publishing pipeline health watchdog
//!
//! Each tick checks the publish job heartbeat and the overdue backlog, alerts
//! through [`AlertDispatcher`] when either looks wrong, and records its own
//! run. The run record is finalized on every path, including panics.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;

use crate::constants::{
    OVERDUE_SAMPLE_LIMIT, PUBLISH_JOB_NAME, WATCHDOG_JOB_TAG, WATCHDOG_RUNBOOK_ACTION,
};
use crate::domain::scheduled_posts::{OverdueBacklog, OverdueItem};
use crate::domain::{CronRunStore, ScheduledPostStore, StoreError};
use crate::models::PostStatus;
use crate::services::alerts::{self, Alert, AlertDispatcher, AlertError, Severity, SkipReason};

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("alert delivery failed: {0}")]
    Alert(#[from] AlertError),
    #[error("watchdog check panicked: {0}")]
    Panicked(String),
}

/// Windows in minutes, validated positive at startup
#[derive(Debug, Clone, Copy)]
pub struct WatchdogSettings {
    pub heartbeat_minutes: i64,
    pub overdue_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthIssue {
    PublishHeartbeatStale,
    OverdueScheduledCasts,
}

impl HealthIssue {
    pub fn code(&self) -> &'static str {
        match self {
            HealthIssue::PublishHeartbeatStale => "publish_heartbeat_stale",
            HealthIssue::OverdueScheduledCasts => "overdue_scheduled_casts",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatCheck {
    pub job: &'static str,
    pub last_success_at: Option<DateTime<Utc>>,
    pub cutoff: DateTime<Utc>,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueSample {
    pub id: i64,
    pub network: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: PostStatus,
}

impl From<OverdueItem> for OverdueSample {
    fn from(item: OverdueItem) -> Self {
        Self {
            id: item.id,
            network: item.network,
            scheduled_at: item.scheduled_at,
            status: item.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueCheck {
    pub count: i64,
    pub cutoff: DateTime<Utc>,
    pub max_overdue_minutes: i64,
    pub oldest: Vec<OverdueSample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthChecks {
    pub heartbeat: HeartbeatCheck,
    pub overdue: OverdueCheck,
}

#[derive(Debug, Clone)]
pub struct Assessment {
    pub checks: HealthChecks,
    /// Sorted by code
    pub issues: Vec<HealthIssue>,
}

impl Assessment {
    pub fn healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Decide health from the heartbeat and backlog. Pure.
pub fn assess(
    now: DateTime<Utc>,
    settings: WatchdogSettings,
    last_success: Option<DateTime<Utc>>,
    backlog: OverdueBacklog,
) -> Assessment {
    let heartbeat_cutoff = now - Duration::minutes(settings.heartbeat_minutes);
    let overdue_cutoff = now - Duration::minutes(settings.overdue_minutes);

    let stale = last_success.is_none_or(|at| at < heartbeat_cutoff);
    let max_overdue_minutes = backlog
        .oldest
        .first()
        .map(|item| (now - item.scheduled_at).num_minutes())
        .unwrap_or(0);

    let mut issues = Vec::new();
    if stale {
        issues.push(HealthIssue::PublishHeartbeatStale);
    }
    if backlog.count > 0 {
        issues.push(HealthIssue::OverdueScheduledCasts);
    }
    issues.sort_by_key(|issue| issue.code());

    Assessment {
        checks: HealthChecks {
            heartbeat: HeartbeatCheck {
                job: PUBLISH_JOB_NAME,
                last_success_at: last_success,
                cutoff: heartbeat_cutoff,
                stale,
            },
            overdue: OverdueCheck {
                count: backlog.count,
                cutoff: overdue_cutoff,
                max_overdue_minutes,
                oldest: backlog.oldest.into_iter().map(OverdueSample::from).collect(),
            },
        },
        issues,
    }
}

/// Alert identity: the job tag plus the sorted issue codes
pub fn alert_fingerprint(issues: &[HealthIssue]) -> String {
    let mut parts = vec![WATCHDOG_JOB_TAG];
    parts.extend(issues.iter().map(HealthIssue::code));
    alerts::fingerprint(parts.as_slice())
}

pub fn build_alert(
    assessment: &Assessment,
    settings: WatchdogSettings,
    source: &str,
    now: DateTime<Utc>,
) -> Alert {
    let heartbeat = &assessment.checks.heartbeat;
    let overdue = &assessment.checks.overdue;

    let mut summary = Vec::new();
    if heartbeat.stale {
        summary.push(format!(
            "{} has not completed successfully in the last {} minutes.",
            PUBLISH_JOB_NAME, settings.heartbeat_minutes
        ));
    }
    if overdue.count > 0 {
        summary.push(format!(
            "{} scheduled casts are more than {} minutes overdue.",
            overdue.count, settings.overdue_minutes
        ));
    }

    let last_success = heartbeat
        .last_success_at
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "none".to_string());

    let mut details = vec![
        format!("Last successful {} run: {}", PUBLISH_JOB_NAME, last_success),
        format!("Overdue scheduled casts: {}", overdue.count),
    ];
    if !overdue.oldest.is_empty() {
        let ids: Vec<String> = overdue.oldest.iter().map(|s| s.id.to_string()).collect();
        details.push(format!("Oldest overdue ids: {}", ids.join(", ")));
        details.push(format!(
            "Oldest overdue age: {} min",
            overdue.max_overdue_minutes
        ));
    }
    details.push(format!("Action: {}", WATCHDOG_RUNBOOK_ACTION));

    let mut alert = Alert::new(
        "Publishing pipeline unhealthy",
        summary.join(" "),
        Severity::Critical,
    );
    alert.details = details;
    alert.metadata = vec![
        (
            "Heartbeat window".to_string(),
            format!("{} min", settings.heartbeat_minutes),
        ),
        (
            "Overdue window".to_string(),
            format!("{} min", settings.overdue_minutes),
        ),
        ("Source".to_string(), source.to_string()),
    ];
    alert.timestamp = Some(now);
    alert
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogReport {
    pub success: bool,
    pub healthy: bool,
    pub issues: Vec<HealthIssue>,
    pub checks: HealthChecks,
    pub alert_sent: bool,
    pub alert_reason: Option<SkipReason>,
    pub overdue_count: i64,
    pub max_overdue_minutes: i64,
    pub timestamp: DateTime<Utc>,
    pub run_id: i64,
}

#[derive(Clone)]
pub struct Watchdog {
    runs: Arc<dyn CronRunStore>,
    posts: Arc<dyn ScheduledPostStore>,
    alerts: AlertDispatcher,
    settings: WatchdogSettings,
}

impl Watchdog {
    pub fn new(
        runs: Arc<dyn CronRunStore>,
        posts: Arc<dyn ScheduledPostStore>,
        alerts: AlertDispatcher,
        settings: WatchdogSettings,
    ) -> Self {
        Self {
            runs,
            posts,
            alerts,
            settings,
        }
    }

    /// One tick. The run record is written first and always finalized.
    pub async fn run(&self, source: &str) -> Result<WatchdogReport, WatchdogError> {
        let now = Utc::now();
        let run_id = self.runs.start_run(WATCHDOG_JOB_TAG, source, now).await?;

        let result = match AssertUnwindSafe(self.check(run_id, source, now))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(WatchdogError::Panicked(panic_message(panic))),
        };

        let error_message = result.as_ref().err().map(|e| e.to_string());
        if let Some(message) = &error_message {
            tracing::error!(run_id, source, "watchdog run failed: {}", message);
        }

        if let Err(e) = self
            .runs
            .finish_run(run_id, result.is_ok(), error_message.as_deref(), Utc::now())
            .await
        {
            tracing::error!(run_id, "failed to finalize watchdog run: {}", e);
        }

        result
    }

    async fn check(
        &self,
        run_id: i64,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<WatchdogReport, WatchdogError> {
        let overdue_cutoff = now - Duration::minutes(self.settings.overdue_minutes);
        let last_success = self.runs.last_success(PUBLISH_JOB_NAME).await?;
        let backlog = self
            .posts
            .overdue_backlog(overdue_cutoff, OVERDUE_SAMPLE_LIMIT)
            .await?;

        let assessment = assess(now, self.settings, last_success, backlog);

        let (alert_sent, alert_reason) = if assessment.healthy() {
            tracing::info!(run_id, source, "publishing pipeline healthy");
            (false, None)
        } else {
            let fingerprint = alert_fingerprint(&assessment.issues);
            let alert = build_alert(&assessment, self.settings, source, now);
            tracing::warn!(
                run_id,
                source,
                fingerprint = %fingerprint,
                issues = ?assessment.issues,
                "publishing pipeline unhealthy"
            );
            let outcome = self.alerts.dispatch_at(&fingerprint, &alert, now).await?;
            (outcome.sent, outcome.reason)
        };

        Ok(WatchdogReport {
            success: true,
            healthy: assessment.healthy(),
            overdue_count: assessment.checks.overdue.count,
            max_overdue_minutes: assessment.checks.overdue.max_overdue_minutes,
            issues: assessment.issues,
            checks: assessment.checks,
            alert_sent,
            alert_reason,
            timestamp: now,
            run_id,
        })
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
