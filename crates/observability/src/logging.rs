//! Logging initialization and configuration
//!
//! Sets up the tracing subscriber in one of three output formats. The default
//! level comes from configuration; `RUST_LOG` overrides it.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    #[default]
    Pretty,
    /// JSON format for structured logging (better for log aggregation)
    Json,
    /// Compact format (less verbose than pretty)
    Compact,
}

impl LogFormat {
    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
            Self::Compact => "compact",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown log format: {}", s))
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalised level directive; unknown levels fall back to `info`
pub fn level_directive(level: &str) -> String {
    let level = level.trim().to_lowercase();
    if LEVELS.contains(&level.as_str()) {
        level
    } else {
        "info".to_string()
    }
}

/// Dependencies that are chatty below `warn`
const QUIET_TARGETS: &str = "hyper=warn,tungstenite=warn,tokio_tungstenite=warn,redis=warn";

/// Install the global subscriber
///
/// `default_level` applies when `RUST_LOG` is unset. Fails if a subscriber is
/// already installed.
pub fn init_logging(service_name: &str, format: LogFormat, default_level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},{}", level_directive(default_level), QUIET_TARGETS))
    });

    let pretty = (format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
    });
    let json = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
    });
    let compact = (format == LogFormat::Compact).then(|| fmt::layer().compact().with_target(false));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(pretty)
        .with(json)
        .with(compact)
        .try_init()?;

    tracing::info!(service = service_name, format = %format, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("compact"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("xml"), None);

        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("invalid".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Compact.to_string(), "compact");
    }

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive("DEBUG"), "debug");
        assert_eq!(level_directive(" warn "), "warn");
        assert_eq!(level_directive("loud"), "info");
    }
}
