//! Logging setup for the monitor.
//!
//! The log level comes from `HK_LOG_LEVEL`, then `RUST_LOG`, then the
//! level given on the command line.

use std::str::FromStr;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Compact stderr output
    Development,
    /// Verbose diagnostics with source locations
    Debug,
    /// One JSON object per line, for log collectors
    Json,
}

impl FromStr for LoggingMode {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(LoggingMode::Development),
            "debug" => Ok(LoggingMode::Debug),
            "json" => Ok(LoggingMode::Json),
            other => Err(LoggingError::InvalidMode(other.to_string())),
        }
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid log filter '{0}'")]
    InvalidFilter(String),

    #[error("Invalid log mode '{0}'. Valid modes: development, debug, json")]
    InvalidMode(String),
}

/// Install the global subscriber.
///
/// Call once, before the listener starts.
pub fn init_logging(mode: LoggingMode, default_level: &str) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = create_env_filter(default_level, |key| std::env::var(key).ok())?;

    let result = match mode {
        LoggingMode::Development => Registry::default()
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact(),
            )
            .with(filter)
            .try_init(),
        LoggingMode::Debug => Registry::default()
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(filter)
            .try_init(),
        LoggingMode::Json => Registry::default()
            .with(fmt::layer().json().with_current_span(false))
            .with(filter)
            .try_init(),
    };

    result.map_err(|e| LoggingError::TracingInit(e.to_string()))
}

/// Build the filter from `HK_LOG_LEVEL`, `RUST_LOG` or `default_level`, in
/// that order.
fn create_env_filter(
    default_level: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<EnvFilter, LoggingError> {
    let directives = lookup("HK_LOG_LEVEL")
        .or_else(|| lookup("RUST_LOG"))
        .unwrap_or_else(|| default_level.to_string());

    EnvFilter::try_new(&directives).map_err(|_| LoggingError::InvalidFilter(directives))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("development", LoggingMode::Development)]
    #[case("DEV", LoggingMode::Development)]
    #[case("debug", LoggingMode::Debug)]
    #[case("Json", LoggingMode::Json)]
    fn test_parse_mode(#[case] input: &str, #[case] expected: LoggingMode) {
        assert_eq!(input.parse::<LoggingMode>().unwrap(), expected);
    }

    #[test]
    fn test_parse_mode_rejects_unknown() {
        assert!(matches!(
            "verbose".parse::<LoggingMode>(),
            Err(LoggingError::InvalidMode(_))
        ));
    }

    #[test]
    fn test_env_filter_precedence() {
        let filter = create_env_filter("info", |key| match key {
            "HK_LOG_LEVEL" => Some("debug".to_string()),
            "RUST_LOG" => Some("warn".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(filter.to_string(), "debug");

        let filter = create_env_filter("info", |key| {
            (key == "RUST_LOG").then(|| "alarm_server=trace".to_string())
        })
        .unwrap();
        assert_eq!(filter.to_string(), "alarm_server=trace");

        let filter = create_env_filter("info", |_| None).unwrap();
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn test_invalid_filter() {
        let result = create_env_filter("info", |key| {
            (key == "HK_LOG_LEVEL").then(|| "alarm_server=loud".to_string())
        });
        assert!(matches!(result, Err(LoggingError::InvalidFilter(_))));
    }
}
