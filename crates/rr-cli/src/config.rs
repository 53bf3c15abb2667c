//! Configuration loading for the `rr` binary.

use anyhow::{bail, Context, Result};
use rr_actions::ExecutorConfig;
use rr_core::{EngineConfig, EnrichmentConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const REDACTED: &str = "***REDACTED***";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub remediation: RemediationConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Loads `path` when given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.server.port == 0 {
            problems.push("server.port must be non-zero".to_string());
        }
        if self.server.request_timeout_secs == 0 {
            problems.push("server.request_timeout_secs must be non-zero".to_string());
        }
        if self.database.url.trim().is_empty() {
            problems.push("database.url must be set".to_string());
        }
        for (name, value) in [
            ("workflow.enrichment_timeout_secs", self.workflow.enrichment_timeout_secs),
            ("workflow.approval_timeout_secs", self.workflow.approval_timeout_secs),
            ("workflow.sweep_interval_secs", self.workflow.sweep_interval_secs),
            ("remediation.hard_timeout_secs", self.remediation.hard_timeout_secs),
        ] {
            if value == 0 {
                problems.push(format!("{name} must be non-zero"));
            }
        }
        if self.workflow.sweep_interval_secs > self.workflow.approval_timeout_secs {
            problems.push(
                "workflow.sweep_interval_secs must not exceed workflow.approval_timeout_secs"
                    .to_string(),
            );
        }
        if self.remediation.max_attempts == 0 {
            problems.push("remediation.max_attempts must be at least 1".to_string());
        }
        if self.remediation.initial_backoff_ms > self.remediation.max_backoff_ms {
            problems.push(
                "remediation.initial_backoff_ms must not exceed remediation.max_backoff_ms"
                    .to_string(),
            );
        }
        if let Some(url) = &self.notifications.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                problems.push("notifications.webhook_url must be an http(s) URL".to_string());
            }
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            problems.push(format!("logging.level '{}' is not a level", self.logging.level));
        }

        if !problems.is_empty() {
            bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
        }
        Ok(())
    }

    /// Creates a copy with secrets redacted.
    ///
    /// Webhook URLs commonly embed a token, so the whole URL is hidden.
    pub fn redact(&self) -> Self {
        let mut config = self.clone();
        if config.notifications.webhook_url.is_some() {
            config.notifications.webhook_url = Some(REDACTED.to_string());
        }
        config
    }

    pub fn engine_config(&self) -> EngineConfig {
        let workflow = &self.workflow;
        EngineConfig {
            enrichment: EnrichmentConfig {
                lookup_timeout: Duration::from_secs(workflow.enrichment_timeout_secs),
            },
            approval_timeout: Duration::from_secs(workflow.approval_timeout_secs),
            sweep_interval: Duration::from_secs(workflow.sweep_interval_secs),
            max_conflict_retries: workflow.max_conflict_retries,
            spawn_workers: true,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let remediation = &self.remediation;
        ExecutorConfig {
            retry: RetryPolicy {
                max_attempts: remediation.max_attempts,
                initial_delay: Duration::from_millis(remediation.initial_backoff_ms),
                max_delay: Duration::from_millis(remediation.max_backoff_ms),
                ..RetryPolicy::default()
            },
            hard_timeout: Duration::from_secs(remediation.hard_timeout_secs),
            ..ExecutorConfig::default()
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Serve Swagger UI at `/swagger-ui`.
    #[serde(default = "default_true")]
    pub enable_swagger: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            enable_swagger: true,
        }
    }
}

/// Where the incident event log lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `sqlite::memory:` keeps everything in process; a file URL such as
    /// `sqlite://rr.db?mode=rwc` survives restarts.
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "sqlite::memory:".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_enrichment_timeout")]
    pub enrichment_timeout_secs: u64,

    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

fn default_enrichment_timeout() -> u64 {
    60
}

fn default_approval_timeout() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_max_conflict_retries() -> u32 {
    5
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            enrichment_timeout_secs: default_enrichment_timeout(),
            approval_timeout_secs: default_approval_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

/// Retry and timeout bounds for remediation calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_hard_timeout")]
    pub hard_timeout_secs: u64,

    /// Use the scripted browser backend instead of the instant mock.
    #[serde(default = "default_true")]
    pub demo_browser: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    200
}

fn default_max_backoff() -> u64 {
    5000
}

fn default_hard_timeout() -> u64 {
    300
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            hard_timeout_secs: default_hard_timeout(),
            demo_browser: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Approval requests are also posted here when set.
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
}

fn default_webhook_timeout() -> u64 {
    10
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.workflow.approval_timeout_secs, 3600);
        assert_eq!(config.remediation.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
server:
  port: 9090
workflow:
  approval_timeout_secs: 600
notifications:
  webhook_url: https://hooks.example.com/T000/secret
"#;

        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.workflow.approval_timeout_secs, 600);
        assert_eq!(config.workflow.sweep_interval_secs, 30);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "database:\n  url: sqlite://rr.db?mode=rwc\nlogging:\n  json: true").unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.database.url, "sqlite://rr.db?mode=rwc");
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server: [not, a, map]").unwrap();

        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = AppConfig::default();
        config.workflow.approval_timeout_secs = 0;
        config.remediation.max_attempts = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("workflow.approval_timeout_secs"));
        assert!(err.contains("remediation.max_attempts"));
    }

    #[test]
    fn test_validate_rejects_bad_level_and_webhook() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        config.notifications.webhook_url = Some("ftp://example.com".to_string());

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("logging.level"));
        assert!(err.contains("webhook_url"));
    }

    #[test]
    fn test_redact_hides_webhook() {
        let mut config = AppConfig::default();
        config.notifications.webhook_url = Some("https://hooks.example.com/T000/secret".to_string());

        let redacted = config.redact();
        assert_eq!(redacted.notifications.webhook_url.as_deref(), Some(REDACTED));
        assert_eq!(AppConfig::default().redact(), AppConfig::default());
    }

    #[test]
    fn test_maps_onto_library_configs() {
        let mut config = AppConfig::default();
        config.workflow.enrichment_timeout_secs = 5;
        config.remediation.max_backoff_ms = 1000;

        let engine = config.engine_config();
        assert_eq!(engine.enrichment.lookup_timeout, Duration::from_secs(5));
        assert_eq!(engine.approval_timeout, Duration::from_secs(3600));

        let executor = config.executor_config();
        assert_eq!(executor.retry.max_attempts, 3);
        assert_eq!(executor.retry.max_delay, Duration::from_millis(1000));
        assert_eq!(executor.hard_timeout, Duration::from_secs(300));
    }
}
