//! Application constants

/// Job name of the cron that publishes due scheduled casts (the heartbeat source)
pub const PUBLISH_JOB_NAME: &str = "publish_due_casts";

/// Job tag of the health watchdog; also the first fingerprint part of its alerts
pub const WATCHDOG_JOB_TAG: &str = "cron-watchdog";

/// Maximum overdue items fetched as examples for an alert
pub const OVERDUE_SAMPLE_LIMIT: i64 = 10;

/// Remediation pointer included in watchdog alerts
pub const WATCHDOG_RUNBOOK_ACTION: &str =
    "Check the publish_due_casts cron logs, then trigger it manually to drain the backlog";

/// Default heartbeat window (minutes)
pub const DEFAULT_HEARTBEAT_MINUTES: i64 = 10;

/// Default overdue window (minutes)
pub const DEFAULT_OVERDUE_MINUTES: i64 = 10;

/// Default cooldown between identical alerts (minutes)
pub const DEFAULT_ALERT_COOLDOWN_MINUTES: i64 = 30;

// Image re-encoding schedule
pub const COMPRESSION_MAX_ATTEMPTS: u32 = 6;
pub const COMPRESSION_START_QUALITY: u8 = 82;
pub const COMPRESSION_QUALITY_STEP: u8 = 8;
pub const COMPRESSION_MIN_QUALITY: u8 = 42;
pub const COMPRESSION_SCALE_PER_ATTEMPT: f64 = 0.9;
pub const COMPRESSION_MIN_LONG_EDGE: u32 = 720;

/// Largest compressible image downloaded for re-encoding (50 MB)
pub const MEDIA_DECODE_CAP_BYTES: usize = 50 * 1024 * 1024;

/// Readiness polls after an upload before giving up
pub const MEDIA_POLL_ATTEMPTS: u32 = 20;

/// Delay between readiness polls (milliseconds)
pub const MEDIA_POLL_DELAY_MS: u64 = 1500;

/// Chat-ops embeds reject descriptions longer than this
pub const ALERT_DESCRIPTION_LIMIT: usize = 4096;

/// Timeout applied to every outbound HTTP request (seconds)
pub const HTTP_TIMEOUT_SECS: u64 = 60;

/// Maximum request body accepted by the publish endpoint (1 MB)
pub const MAX_PUBLISH_BODY_SIZE: usize = 1024 * 1024;
