//! Triage command - runs one alert through an in-process engine.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use rr_core::{
    ApprovalDecision, EngineConfig, InMemoryStateStore, Incident, IncidentState, WorkflowEngine,
};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use super::build_engine;
use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct TriageOptions {
    /// Alert JSON file, `-` for stdin.
    pub file: PathBuf,
    /// Decision applied if the incident stops for approval.
    pub decision: Option<ApprovalDecision>,
    pub json: bool,
}

pub async fn run_triage(config: AppConfig, options: TriageOptions) -> Result<()> {
    config.validate()?;

    let body = read_alert(&options.file)?;
    let alert = rr_api::ingest::parse_alert(&body)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("Alert rejected")?;

    let engine = build_engine(
        &config,
        Arc::new(InMemoryStateStore::new()),
        EngineConfig {
            spawn_workers: false,
            ..config.engine_config()
        },
    )?;

    let incident = triage(&engine, alert, options.decision).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&incident)?);
    } else {
        print_incident(&incident);
    }
    Ok(())
}

/// Ingests, drives to the first suspension point and applies `decision`
/// when the incident waits for approval.
async fn triage(
    engine: &WorkflowEngine,
    alert: rr_core::Alert,
    decision: Option<ApprovalDecision>,
) -> Result<Incident> {
    let incident_id = engine.ingest(alert).await?.incident_id();
    let mut incident = engine.drive(incident_id).await?;

    if incident.state == IncidentState::AwaitingApproval {
        if let (Some(decision), Some(request)) = (decision, incident.approval.as_ref()) {
            engine
                .resolve_approval(
                    request.request_id,
                    decision,
                    Some("cli".to_string()),
                    None,
                )
                .await?;
            incident = engine.drive(incident_id).await?;
        }
    }
    Ok(incident)
}

fn read_alert(path: &PathBuf) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut body = Vec::new();
        std::io::stdin()
            .read_to_end(&mut body)
            .context("Failed to read alert from stdin")?;
        return Ok(body);
    }
    let body = std::fs::read(path)
        .with_context(|| format!("Failed to read alert file: {}", path.display()))?;
    if body.is_empty() {
        bail!("Alert file is empty: {}", path.display());
    }
    Ok(body)
}

fn print_incident(incident: &Incident) {
    println!("{}", "Incident".bold());
    println!("────────");
    println!("  ID:     {}", incident.incident_id);
    println!("  Alert:  {} ({})", incident.alert.alert_id, incident.alert.alert_type);
    println!("  State:  {}", colored_state(incident.state));

    if !incident.enrichments.is_empty() {
        println!();
        println!("{}", "Enrichment".bold());
        for result in incident.enrichments.values() {
            println!(
                "  {:<36} {:<10} {:.2} {}",
                result.indicator, result.reputation, result.confidence, result.category
            );
        }
        for indicator in &incident.degraded_indicators {
            println!("  {:<36} {}", indicator.value, "lookup failed".yellow());
        }
    }

    if let Some(verdict) = &incident.verdict {
        println!();
        println!("{}", "Verdict".bold());
        println!("  {} (score {})", verdict.severity, verdict.score);
        for reason in &verdict.reasons {
            println!("  - {reason}");
        }
    }

    if let Some(approval) = &incident.approval {
        println!();
        println!("{}", "Approval".bold());
        println!("  Request: {}", approval.request_id);
        println!("  Status:  {}", approval.status);
        if approval.is_pending() {
            println!("  Expires: {}", approval.expires_at);
            println!(
                "  {}",
                "Re-run with --decision approved|denied to resolve".dimmed()
            );
        }
    }

    if let Some(record) = &incident.remediation {
        println!();
        println!("{}", "Remediation".bold());
        println!("  {} {} -> {}", record.kind, record.target, record.outcome);
        for line in &record.evidence {
            println!("  - {line}");
        }
        if let Some(url) = &record.recording_url {
            println!("  Recording: {url}");
        }
    }

    if let Some(reason) = &incident.failure_reason {
        println!();
        println!("  {} {}", "Failure:".red(), reason);
    }
}

fn colored_state(state: IncidentState) -> colored::ColoredString {
    match state {
        IncidentState::Closed | IncidentState::Remediated => state.as_str().green(),
        IncidentState::Failed | IncidentState::Denied => state.as_str().red(),
        IncidentState::AwaitingApproval => state.as_str().yellow(),
        _ => state.as_str().normal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rr_core::RemediationOutcome;

    fn engine() -> WorkflowEngine {
        let mut config = AppConfig::default();
        config.remediation.demo_browser = false;
        build_engine(
            &config,
            Arc::new(InMemoryStateStore::new()),
            EngineConfig {
                spawn_workers: false,
                ..config.engine_config()
            },
        )
        .unwrap()
    }

    fn legacy_alert(source_ip: &str) -> rr_core::Alert {
        let body = serde_json::json!({
            "alert_id": "SEC-2025-001",
            "type": "MALWARE_DETECTED",
            "source_ip": source_ip,
            "indicators": {},
            "timestamp": "2025-10-18T12:00:00Z"
        });
        rr_api::ingest::parse_alert(body.to_string().as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_medium_alert_closes() {
        let incident = triage(&engine(), legacy_alert("192.168.1.100"), None)
            .await
            .unwrap();
        assert_eq!(incident.state, IncidentState::Closed);
        assert_eq!(
            incident.remediation.map(|r| r.outcome),
            Some(RemediationOutcome::Success)
        );
    }

    #[tokio::test]
    async fn test_high_alert_waits_without_decision() {
        let incident = triage(&engine(), legacy_alert("10.0.0.50"), None)
            .await
            .unwrap();
        assert_eq!(incident.state, IncidentState::AwaitingApproval);
    }

    #[tokio::test]
    async fn test_high_alert_with_approval_remediates() {
        let incident = triage(
            &engine(),
            legacy_alert("10.0.0.50"),
            Some(ApprovalDecision::Approved),
        )
        .await
        .unwrap();
        assert_eq!(incident.state, IncidentState::Closed);
        assert!(incident.remediation.is_some());
    }

    #[tokio::test]
    async fn test_high_alert_with_denial_skips_remediation() {
        let incident = triage(
            &engine(),
            legacy_alert("10.0.0.50"),
            Some(ApprovalDecision::Denied),
        )
        .await
        .unwrap();
        assert_eq!(incident.state, IncidentState::Closed);
        assert!(incident.remediation.is_none());
    }

    #[test]
    fn test_read_alert_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"{}").unwrap();
        assert_eq!(read_alert(&file.path().to_path_buf()).unwrap(), b"{}");

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(read_alert(&empty.path().to_path_buf()).is_err());
    }
}
