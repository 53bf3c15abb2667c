//! Metric descriptors and Prometheus export.
//!
//! Components emit through the `metrics` facade directly; this module only
//! describes the series and installs the recorder that renders them.

use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

pub const ALERTS_RECEIVED: &str = "rr_alerts_received_total";
pub const ALERTS_DEDUPLICATED: &str = "rr_alerts_deduplicated_total";
pub const INCIDENTS_CREATED: &str = "rr_incidents_created_total";
pub const INCIDENTS_CLOSED: &str = "rr_incidents_closed_total";
pub const INCIDENTS_PURGED: &str = "rr_incidents_purged_total";
pub const APPROVALS_REQUESTED: &str = "rr_approvals_requested_total";
pub const APPROVALS_RESOLVED: &str = "rr_approvals_resolved_total";
pub const APPROVAL_NOTIFICATIONS_FAILED: &str = "rr_approval_notifications_failed_total";
pub const ENRICHMENT_LOOKUPS: &str = "rr_enrichment_lookups_total";
pub const ENRICHMENT_FAILURES: &str = "rr_enrichment_failures_total";
pub const ENRICHMENT_TIMEOUTS: &str = "rr_enrichment_timeouts_total";
pub const ENRICHMENT_CACHE_HITS: &str = "rr_enrichment_cache_hits_total";
pub const REMEDIATION_ATTEMPTS: &str = "rr_remediation_attempts_total";
pub const REMEDIATION_OUTCOMES: &str = "rr_remediation_outcomes_total";
pub const REMEDIATION_IDEMPOTENT_HITS: &str = "rr_remediation_idempotent_hits_total";
pub const REMEDIATION_DURATION: &str = "rr_remediation_duration_seconds";
pub const VERSION_CONFLICTS: &str = "rr_version_conflicts_total";

/// Every counter emitted by the workspace.
pub const COUNTERS: [&str; 16] = [
    ALERTS_RECEIVED,
    ALERTS_DEDUPLICATED,
    INCIDENTS_CREATED,
    INCIDENTS_CLOSED,
    INCIDENTS_PURGED,
    APPROVALS_REQUESTED,
    APPROVALS_RESOLVED,
    APPROVAL_NOTIFICATIONS_FAILED,
    ENRICHMENT_LOOKUPS,
    ENRICHMENT_FAILURES,
    ENRICHMENT_TIMEOUTS,
    ENRICHMENT_CACHE_HITS,
    REMEDIATION_ATTEMPTS,
    REMEDIATION_OUTCOMES,
    REMEDIATION_IDEMPOTENT_HITS,
    VERSION_CONFLICTS,
];

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Failed to install Prometheus recorder: {0}")]
    Install(#[from] BuildError),
}

/// Registers descriptions for every series against the current recorder.
pub fn describe_metrics() {
    // Ingestion and incident lifecycle
    describe_counter!(ALERTS_RECEIVED, "Alerts accepted by the ingestion gateway");
    describe_counter!(
        ALERTS_DEDUPLICATED,
        "Alerts answered with an existing incident"
    );
    describe_counter!(INCIDENTS_CREATED, "Incidents opened from new alerts");
    describe_counter!(
        INCIDENTS_CLOSED,
        "Incidents closed, labelled by terminal outcome"
    );
    describe_counter!(INCIDENTS_PURGED, "Closed incidents removed by retention");

    // Approvals
    describe_counter!(APPROVALS_REQUESTED, "Approval requests submitted");
    describe_counter!(
        APPROVALS_RESOLVED,
        "Approval requests resolved, labelled by status"
    );
    describe_counter!(
        APPROVAL_NOTIFICATIONS_FAILED,
        "Approval notifications that could not be delivered"
    );

    // Enrichment
    describe_counter!(
        ENRICHMENT_LOOKUPS,
        "Threat intelligence lookups, labelled by indicator kind"
    );
    describe_counter!(ENRICHMENT_FAILURES, "Threat intelligence lookups that failed");
    describe_counter!(
        ENRICHMENT_TIMEOUTS,
        "Threat intelligence lookups that exceeded the enrichment timeout"
    );
    describe_counter!(
        ENRICHMENT_CACHE_HITS,
        "Threat intelligence lookups answered from cache"
    );

    // Remediation
    describe_counter!(
        REMEDIATION_ATTEMPTS,
        "Backend calls made for remediation actions, labelled by action kind"
    );
    describe_counter!(
        REMEDIATION_OUTCOMES,
        "Remediation actions completed, labelled by outcome"
    );
    describe_counter!(
        REMEDIATION_IDEMPOTENT_HITS,
        "Remediation requests answered from the recorded result"
    );
    describe_histogram!(
        REMEDIATION_DURATION,
        Unit::Seconds,
        "Wall time of a remediation action including retries"
    );

    // Store
    describe_counter!(
        VERSION_CONFLICTS,
        "Appends rejected because the incident moved past the expected version"
    );
}

/// Installs the global Prometheus recorder and describes every series.
///
/// Only one recorder may be installed per process.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::{counter, histogram};

    #[test]
    fn test_names_are_prefixed_and_unique() {
        let mut names: Vec<&str> = COUNTERS.to_vec();
        names.push(REMEDIATION_DURATION);
        for name in &names {
            assert!(name.starts_with("rr_"), "{name}");
        }
        for name in COUNTERS {
            assert!(name.ends_with("_total"), "{name}");
        }
        let count = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), count);
    }

    #[test]
    fn test_local_recorder_renders_descriptions() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_metrics();
            counter!(ALERTS_RECEIVED).increment(2);
            counter!(REMEDIATION_OUTCOMES, "outcome" => "success").increment(1);
            histogram!(REMEDIATION_DURATION, "kind" => "quarantine").record(0.25);
        });

        let rendered = handle.render();
        assert!(rendered.contains("rr_alerts_received_total 2"), "{rendered}");
        assert!(rendered.contains("# HELP rr_alerts_received_total Alerts accepted"));
        assert!(rendered.contains("rr_remediation_outcomes_total{outcome=\"success\"} 1"));
        assert!(rendered.contains("rr_remediation_duration_seconds"));
    }
}
