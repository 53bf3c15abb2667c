//! Subcommand implementations.

mod serve;
mod triage;

pub use serve::run_server;
pub use triage::{run_triage, TriageOptions};

use anyhow::{Context, Result};
use rr_actions::RemediationExecutor;
use rr_connectors::{
    DemoBrowserBackend, MockRemediationBackend, MockThreatIntelClient, RemediationBackend,
};
use rr_core::{EngineConfig, SharedStateStore, SeverityClassifier, WorkflowEngine};
use rr_policy::{ApprovalGateway, CompositeNotifier, GatewayConfig, LogNotifier, Notifier, WebhookNotifier};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;

/// Wires the engine and its collaborators from configuration.
pub(crate) fn build_engine(
    config: &AppConfig,
    store: SharedStateStore,
    engine_config: EngineConfig,
) -> Result<WorkflowEngine> {
    let backend: Arc<dyn RemediationBackend> = if config.remediation.demo_browser {
        Arc::new(DemoBrowserBackend::new())
    } else {
        Arc::new(MockRemediationBackend::new("firewall"))
    };
    let executor = RemediationExecutor::new(store.clone(), backend, config.executor_config());

    let gateway = ApprovalGateway::new(build_notifier(config)?, GatewayConfig::default());

    Ok(WorkflowEngine::new(
        store,
        Arc::new(MockThreatIntelClient::with_reference_data()),
        Arc::new(SeverityClassifier::new()),
        Arc::new(gateway),
        Arc::new(executor),
        engine_config,
    ))
}

fn build_notifier(config: &AppConfig) -> Result<Arc<dyn Notifier>> {
    let log = LogNotifier::new("log");
    let Some(url) = &config.notifications.webhook_url else {
        return Ok(Arc::new(log));
    };

    let webhook = WebhookNotifier::new(
        url.clone(),
        Duration::from_secs(config.notifications.webhook_timeout_secs),
    )
    .context("Failed to build webhook notifier")?;

    Ok(Arc::new(
        CompositeNotifier::new()
            .add_notifier(log)
            .add_notifier(webhook),
    ))
}
