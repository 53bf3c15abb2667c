//! Application state shared across handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use rr_core::WorkflowEngine;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Drives incidents and answers queries against the state store.
    pub engine: WorkflowEngine,
    /// Renders `/metrics` when a recorder is installed.
    pub prometheus_handle: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self {
            engine,
            prometheus_handle: None,
        }
    }

    pub fn with_prometheus_handle(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus_handle = Some(Arc::new(handle));
        self
    }
}
