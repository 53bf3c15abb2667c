//! # rr-observability
//!
//! Logging and metrics setup for Runbook Responder.
//!
//! Other crates log through `tracing` and count through the `metrics`
//! facade; this crate installs the subscriber and the Prometheus recorder
//! that back them.

pub mod logging;
pub mod metrics;

pub use self::logging::{init_logging, init_logging_with_config, LoggingConfig, LoggingError};
pub use self::metrics::{describe_metrics, install_prometheus_recorder, MetricsError};
pub use metrics_exporter_prometheus::PrometheusHandle;
