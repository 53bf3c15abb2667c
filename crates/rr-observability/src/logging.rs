//! Logging infrastructure for Runbook Responder.
//!
//! Built on `tracing-subscriber`. The filter comes from `RR_LOG`, then
//! `RUST_LOG`, then the configured level applied to the `rr_*` crates.

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "RR_LOG";

const RR_CRATES: [&str; 7] = [
    "rr_core",
    "rr_connectors",
    "rr_policy",
    "rr_actions",
    "rr_observability",
    "rr_api",
    "rr",
];

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    /// JSON lines instead of human-readable output.
    pub json_format: bool,
    /// Emit span open/close events.
    pub include_spans: bool,
    pub include_location: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            include_spans: false,
            include_location: false,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Verbose human-readable output.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            json_format: false,
            include_spans: true,
            include_location: true,
            include_target: true,
        }
    }

    /// JSON output for log aggregation.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            json_format: true,
            include_spans: false,
            include_location: false,
            include_target: true,
        }
    }

    /// Builds a config from a level name such as `"debug"` and a format flag.
    pub fn from_level_name(level: &str, json_format: bool) -> Result<Self, LoggingError> {
        let level = level
            .trim()
            .parse::<Level>()
            .map_err(|_| LoggingError::InvalidLevel(level.to_string()))?;
        Ok(Self {
            level,
            json_format,
            ..Self::default()
        })
    }

    /// Filter directive used when neither env variable is set.
    pub fn default_directive(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        RR_CRATES
            .iter()
            .map(|krate| format!("{krate}={level}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        for var in [LOG_ENV_VAR, "RUST_LOG"] {
            if let Ok(directive) = std::env::var(var) {
                if !directive.trim().is_empty() {
                    return EnvFilter::try_new(&directive)
                        .map_err(|e| LoggingError::InvalidFilter(format!("{var}: {e}")));
                }
            }
        }
        EnvFilter::try_new(self.default_directive())
            .map_err(|e| LoggingError::InvalidFilter(e.to_string()))
    }
}

/// Initializes logging with the default configuration.
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Installs the global subscriber. Fails instead of panicking if one is
/// already installed.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = config.env_filter()?;

    let span_events = if config.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let result = if config.json_format {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    };

    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

/// Creates a span for work on one incident.
#[macro_export]
macro_rules! incident_span {
    ($incident_id:expr) => {
        tracing::info_span!("incident", incident_id = %$incident_id)
    };
    ($incident_id:expr, $($field:tt)*) => {
        tracing::info_span!("incident", incident_id = %$incident_id, $($field)*)
    };
}

/// Creates a span for one remediation action.
#[macro_export]
macro_rules! action_span {
    ($action_id:expr, $incident_id:expr) => {
        tracing::info_span!("remediation", action_id = %$action_id, incident_id = %$incident_id)
    };
}
