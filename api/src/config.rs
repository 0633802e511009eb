//! Typed configuration, read once from the environment at startup

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::constants::{
    DEFAULT_ALERT_COOLDOWN_MINUTES, DEFAULT_HEARTBEAT_MINUTES, DEFAULT_OVERDUE_MINUTES,
    MEDIA_POLL_ATTEMPTS, MEDIA_POLL_DELAY_MS,
};
use crate::logging::LogFormat;
use crate::services::media::PollPolicy;
use crate::services::watchdog::WatchdogSettings;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.typefully.com/v2";
const DEFAULT_PUBLISH_RATE_PER_SECOND: u64 = 2;
const DEFAULT_PUBLISH_RATE_BURST: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{name} must be a positive integer, got {value:?}")]
    NotPositive { name: &'static str, value: String },
    #[error("{name} is not a valid http(s) URL: {value:?}")]
    InvalidUrl { name: &'static str, value: String },
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    pub heartbeat_minutes: i64,
    pub overdue_minutes: i64,
    pub alert_cooldown_minutes: i64,
}

impl WatchdogConfig {
    pub fn settings(&self) -> WatchdogSettings {
        WatchdogSettings {
            heartbeat_minutes: self.heartbeat_minutes,
            overdue_minutes: self.overdue_minutes,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub per_second: u64,
    pub burst: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// `None` leaves storage unconfigured; storage-backed routes then answer 500
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    pub gateway: GatewayConfig,
    pub alert_webhook_url: Option<String>,
    pub watchdog: WatchdogConfig,
    pub cron_secret: Option<String>,
    pub media_poll: PollPolicy,
    pub publish_rate: RateLimitConfig,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let gateway = GatewayConfig {
            base_url: http_url(
                "GATEWAY_BASE_URL",
                get("GATEWAY_BASE_URL").unwrap_or_else(|| DEFAULT_GATEWAY_BASE_URL.to_string()),
            )?,
            api_key: get("GATEWAY_API_KEY").ok_or(ConfigError::Missing("GATEWAY_API_KEY"))?,
        };

        let alert_webhook_url = get("ALERT_WEBHOOK_URL")
            .map(|url| http_url("ALERT_WEBHOOK_URL", url))
            .transpose()?;

        let watchdog = WatchdogConfig {
            heartbeat_minutes: positive(
                "WATCHDOG_HEARTBEAT_MINUTES",
                get("WATCHDOG_HEARTBEAT_MINUTES"),
                DEFAULT_HEARTBEAT_MINUTES,
            )?,
            overdue_minutes: positive(
                "WATCHDOG_OVERDUE_MINUTES",
                get("WATCHDOG_OVERDUE_MINUTES"),
                DEFAULT_OVERDUE_MINUTES,
            )?,
            alert_cooldown_minutes: positive(
                "WATCHDOG_ALERT_COOLDOWN_MINUTES",
                get("WATCHDOG_ALERT_COOLDOWN_MINUTES"),
                DEFAULT_ALERT_COOLDOWN_MINUTES,
            )?,
        };

        let media_poll = PollPolicy {
            attempts: positive("MEDIA_POLL_ATTEMPTS", get("MEDIA_POLL_ATTEMPTS"), MEDIA_POLL_ATTEMPTS)?,
            delay: Duration::from_millis(positive(
                "MEDIA_POLL_DELAY_MS",
                get("MEDIA_POLL_DELAY_MS"),
                MEDIA_POLL_DELAY_MS,
            )?),
        };

        let publish_rate = RateLimitConfig {
            per_second: positive(
                "PUBLISH_RATE_PER_SECOND",
                get("PUBLISH_RATE_PER_SECOND"),
                DEFAULT_PUBLISH_RATE_PER_SECOND,
            )?,
            burst: positive(
                "PUBLISH_RATE_BURST",
                get("PUBLISH_RATE_BURST"),
                DEFAULT_PUBLISH_RATE_BURST,
            )?,
        };

        let log_format = match get("LOG_FORMAT") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                name: "LOG_FORMAT",
                reason,
            })?,
            None => LogFormat::default(),
        };

        let run_migrations = match get("RUN_MIGRATIONS").as_deref() {
            None | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "RUN_MIGRATIONS",
                    reason: format!("expected true or false, got {:?}", other),
                });
            }
        };

        Ok(Self {
            port: positive("PORT", get("PORT"), DEFAULT_PORT)?,
            database_url: get("DATABASE_URL"),
            database_max_connections: positive(
                "DATABASE_MAX_CONNECTIONS",
                get("DATABASE_MAX_CONNECTIONS"),
                DEFAULT_DATABASE_MAX_CONNECTIONS,
            )?,
            run_migrations,
            gateway,
            alert_webhook_url,
            watchdog,
            cron_secret: get("CRON_SECRET"),
            media_poll,
            publish_rate,
            log_format,
        })
    }
}

fn positive<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(ConfigError::NotPositive { name, value: raw }),
    }
}

fn http_url(name: &'static str, raw: String) -> Result<String, ConfigError> {
    match Url::parse(&raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(raw),
        _ => Err(ConfigError::InvalidUrl { name, value: raw }),
    }
}
