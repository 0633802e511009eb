use std::str::FromStr;
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt};

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Output shape of log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("expected pretty or json, got {:?}", other)),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info` filter.
/// Later calls are no-ops.
pub fn init(format: LogFormat) {
    LOGGER_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = fmt().with_env_filter(filter).with_target(false);

        // try_init: a subscriber installed by a test harness wins
        let _ = match format {
            LogFormat::Pretty => builder.compact().try_init(),
            LogFormat::Json => builder.json().flatten_event(true).try_init(),
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_init_is_idempotent() {
        init(LogFormat::Pretty);
        init(LogFormat::Json);
        tracing::info!("still logging");
    }
}
