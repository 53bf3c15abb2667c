//! Indicator enrichment fan-out.
//!
//! Every distinct indicator of an alert is looked up concurrently, each
//! lookup bounded by its own timeout. A lookup that fails or times out
//! degrades to `unknown/0.0` instead of holding up the incident.

use crate::incident::Indicator;
use rr_connectors::{EnrichmentResult, IndicatorKind, ThreatIntelClient};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Configuration for the enrichment stage.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Upper bound for a single lookup.
    pub lookup_timeout: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(60),
        }
    }
}

/// Result of enriching one incident.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentOutcome {
    /// One result per distinct indicator, in indicator order.
    pub results: Vec<EnrichmentResult>,
    /// Indicators whose lookup failed or timed out.
    pub degraded: Vec<Indicator>,
}

/// Looks up indicators against a threat intelligence client.
pub struct Enricher {
    client: Arc<dyn ThreatIntelClient>,
    config: EnrichmentConfig,
}

impl Enricher {
    pub fn new(client: Arc<dyn ThreatIntelClient>, config: EnrichmentConfig) -> Self {
        Self { client, config }
    }

    /// Enriches every distinct indicator and waits for all of them.
    ///
    /// Repeated `(kind, value)` pairs are looked up once and served from the
    /// first result.
    #[instrument(skip(self, indicators), fields(count = indicators.len()))]
    pub async fn enrich(&self, indicators: &[Indicator]) -> EnrichmentOutcome {
        let mut seen: HashSet<(IndicatorKind, &str)> = HashSet::new();
        let mut distinct = Vec::with_capacity(indicators.len());
        for indicator in indicators {
            if seen.insert((indicator.kind, indicator.value.as_str())) {
                distinct.push(indicator);
            } else {
                metrics::counter!("rr_enrichment_cache_hits_total").increment(1);
            }
        }

        let lookups = distinct.iter().map(|indicator| self.lookup_one(indicator));
        let settled = futures::future::join_all(lookups).await;

        let mut outcome = EnrichmentOutcome::default();
        for (indicator, result) in distinct.into_iter().zip(settled) {
            match result {
                Some(result) => outcome.results.push(result),
                None => {
                    outcome
                        .results
                        .push(EnrichmentResult::unknown(&indicator.value, indicator.kind));
                    outcome.degraded.push(indicator.clone());
                }
            }
        }
        outcome
    }

    async fn lookup_one(&self, indicator: &Indicator) -> Option<EnrichmentResult> {
        metrics::counter!("rr_enrichment_lookups_total", "kind" => indicator.kind.as_str())
            .increment(1);

        let lookup = self.client.lookup(&indicator.value, indicator.kind);
        match tokio::time::timeout(self.config.lookup_timeout, lookup).await {
            Ok(Ok(result)) => {
                debug!(indicator = %indicator, reputation = %result.reputation, "Indicator enriched");
                Some(result)
            }
            Ok(Err(e)) => {
                warn!(indicator = %indicator, error = %e, "Lookup failed, scoring as unknown");
                metrics::counter!("rr_enrichment_failures_total").increment(1);
                None
            }
            Err(_) => {
                warn!(
                    indicator = %indicator,
                    timeout_ms = self.config.lookup_timeout.as_millis() as u64,
                    "Lookup timed out, scoring as unknown"
                );
                metrics::counter!("rr_enrichment_timeouts_total").increment(1);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rr_connectors::{ConnectorError, MockBehavior, MockThreatIntelClient, Reputation};

    fn indicators() -> Vec<Indicator> {
        vec![
            Indicator::ip("10.0.0.50"),
            Indicator::domain("malicious-site.com"),
            Indicator::ip("203.0.113.9"),
        ]
    }

    fn enricher(client: Arc<MockThreatIntelClient>, timeout: Duration) -> Enricher {
        Enricher::new(client, EnrichmentConfig { lookup_timeout: timeout })
    }

    #[tokio::test]
    async fn test_enriches_every_indicator() {
        let client = Arc::new(MockThreatIntelClient::with_reference_data());
        let outcome = enricher(client.clone(), Duration::from_secs(1))
            .enrich(&indicators())
            .await;

        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.degraded.is_empty());
        assert_eq!(outcome.results[0].reputation, Reputation::Malicious);
        assert_eq!(outcome.results[1].category, "phishing");
        assert_eq!(outcome.results[2].reputation, Reputation::Unknown);
        assert_eq!(client.get_call_count(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_indicators_looked_up_once() {
        let client = Arc::new(MockThreatIntelClient::with_reference_data());
        let mut list = indicators();
        list.push(Indicator::ip("10.0.0.50"));

        let outcome = enricher(client.clone(), Duration::from_secs(1)).enrich(&list).await;
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(client.get_call_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_lookup_degrades_to_unknown() {
        let client = Arc::new(MockThreatIntelClient::with_reference_data());
        client
            .set_behavior(MockBehavior::FailOn {
                indicators: vec!["10.0.0.50".to_string()],
                error: ConnectorError::ConnectionFailed("refused".to_string()),
            })
            .await;

        let outcome = enricher(client, Duration::from_secs(1)).enrich(&indicators()).await;
        assert_eq!(outcome.degraded, vec![Indicator::ip("10.0.0.50")]);
        assert_eq!(outcome.results[0].reputation, Reputation::Unknown);
        assert_eq!(outcome.results[0].confidence, 0.0);
        assert_eq!(outcome.results[1].reputation, Reputation::Malicious);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lookup_times_out_without_blocking_others() {
        let client = Arc::new(MockThreatIntelClient::with_reference_data());
        client
            .set_behavior(MockBehavior::SlowOn {
                indicators: vec!["malicious-site.com".to_string()],
                latency: Duration::from_secs(600),
            })
            .await;

        let started = tokio::time::Instant::now();
        let outcome = enricher(client, Duration::from_secs(5)).enrich(&indicators()).await;

        assert!(started.elapsed() < Duration::from_secs(600));
        assert_eq!(outcome.degraded, vec![Indicator::domain("malicious-site.com")]);
        assert_eq!(outcome.results[0].reputation, Reputation::Malicious);
        assert_eq!(outcome.results[1].reputation, Reputation::Unknown);
    }
}
