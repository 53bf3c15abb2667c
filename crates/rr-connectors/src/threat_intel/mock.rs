//! Mock threat intelligence client.
//!
//! Serves preconfigured results keyed by indicator, with failure injection
//! and latency simulation for exercising the enrichment fan-out.

use crate::traits::{
    Connector, ConnectorError, ConnectorHealth, ConnectorResult, EnrichmentResult, IndicatorKind,
    Reputation, ThreatIntelClient,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Source label attached to the reference data set.
pub const REFERENCE_SOURCE: &str = "Mock Threat Intel DB";

/// Behavior configuration for failure injection.
#[derive(Debug, Clone, Default)]
pub enum MockBehavior {
    /// Return results normally.
    #[default]
    Normal,
    /// Fail with a specific error after N calls.
    FailAfter { calls: u64, error: ConnectorError },
    /// Return error for specific indicators.
    FailOn {
        indicators: Vec<String>,
        error: ConnectorError,
    },
    /// Sleep before answering.
    WithLatency(Duration),
    /// Sleep before answering, only for the listed indicators.
    SlowOn {
        indicators: Vec<String>,
        latency: Duration,
    },
    /// Always fail.
    AlwaysFail(ConnectorError),
}

/// Record of a lookup for test verification.
#[derive(Debug, Clone)]
pub struct LookupRecord {
    pub kind: IndicatorKind,
    pub indicator: String,
    pub timestamp: chrono::DateTime<Utc>,
}

/// In-memory threat intelligence client.
pub struct MockThreatIntelClient {
    name: String,
    results: Arc<RwLock<HashMap<(IndicatorKind, String), EnrichmentResult>>>,
    call_count: AtomicU64,
    behavior: Arc<RwLock<MockBehavior>>,
    lookup_history: Arc<RwLock<Vec<LookupRecord>>>,
}

impl MockThreatIntelClient {
    /// Creates an empty client; every lookup answers `unknown`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            results: Arc::new(RwLock::new(HashMap::new())),
            call_count: AtomicU64::new(0),
            behavior: Arc::new(RwLock::new(MockBehavior::Normal)),
            lookup_history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Creates a client seeded with the reference indicator table.
    pub fn with_reference_data() -> Self {
        let sources = vec![REFERENCE_SOURCE.to_string()];
        let seed = [
            (IndicatorKind::Ip, "192.168.1.100", Reputation::Suspicious, 0.65, "C2_server"),
            (IndicatorKind::Ip, "10.0.0.50", Reputation::Malicious, 0.92, "malware_host"),
            (IndicatorKind::Domain, "malicious-site.com", Reputation::Malicious, 0.98, "phishing"),
            (
                IndicatorKind::Hash,
                "d41d8cd98f00b204e9800998ecf8427e",
                Reputation::Malicious,
                0.88,
                "ransomware",
            ),
        ];

        let results = seed
            .into_iter()
            .map(|(kind, indicator, reputation, confidence, category)| {
                (
                    (kind, indicator.to_string()),
                    EnrichmentResult::new(
                        indicator,
                        kind,
                        reputation,
                        confidence,
                        category,
                        sources.clone(),
                    ),
                )
            })
            .collect();

        let client = Self::new("reference");
        Self {
            results: Arc::new(RwLock::new(results)),
            ..client
        }
    }

    /// Adds or replaces the result for an indicator.
    pub async fn add_result(&self, result: EnrichmentResult) {
        let mut results = self.results.write().await;
        results.insert((result.kind, normalize(&result.indicator)), result);
    }

    /// Sets the behavior for failure injection.
    pub async fn set_behavior(&self, behavior: MockBehavior) {
        let mut b = self.behavior.write().await;
        *b = behavior;
    }

    /// Gets the lookup history for test verification.
    pub async fn get_lookup_history(&self) -> Vec<LookupRecord> {
        self.lookup_history.read().await.clone()
    }

    /// Gets the current call count.
    pub fn get_call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    async fn record_and_check(&self, kind: IndicatorKind, indicator: &str) -> ConnectorResult<()> {
        {
            let mut history = self.lookup_history.write().await;
            history.push(LookupRecord {
                kind,
                indicator: indicator.to_string(),
                timestamp: Utc::now(),
            });
        }

        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;

        // Clone out so the lock is not held across a sleep.
        let behavior = self.behavior.read().await.clone();
        match behavior {
            MockBehavior::Normal => Ok(()),
            MockBehavior::FailAfter { calls, error } => {
                if count > calls {
                    Err(error)
                } else {
                    Ok(())
                }
            }
            MockBehavior::FailOn { indicators, error } => {
                if indicators.iter().any(|i| i == indicator) {
                    Err(error)
                } else {
                    Ok(())
                }
            }
            MockBehavior::WithLatency(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            MockBehavior::SlowOn { indicators, latency } => {
                if indicators.iter().any(|i| i == indicator) {
                    tokio::time::sleep(latency).await;
                }
                Ok(())
            }
            MockBehavior::AlwaysFail(error) => Err(error),
        }
    }
}

impl Default for MockThreatIntelClient {
    fn default() -> Self {
        Self::with_reference_data()
    }
}

fn normalize(indicator: &str) -> String {
    indicator.trim().to_lowercase()
}

#[async_trait]
impl Connector for MockThreatIntelClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "threat_intel"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        let behavior = self.behavior.read().await;
        match &*behavior {
            MockBehavior::AlwaysFail(_) => {
                Ok(ConnectorHealth::Unhealthy("Always failing".to_string()))
            }
            MockBehavior::WithLatency(_) => {
                Ok(ConnectorHealth::Degraded("Simulated latency".to_string()))
            }
            _ => Ok(ConnectorHealth::Healthy),
        }
    }
}

#[async_trait]
impl ThreatIntelClient for MockThreatIntelClient {
    async fn lookup(
        &self,
        indicator: &str,
        kind: IndicatorKind,
    ) -> ConnectorResult<EnrichmentResult> {
        let indicator = normalize(indicator);
        self.record_and_check(kind, &indicator).await?;

        let results = self.results.read().await;
        Ok(results
            .get(&(kind, indicator.clone()))
            .cloned()
            .unwrap_or_else(|| EnrichmentResult::unknown(indicator, kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reference_ip_lookups() {
        let client = MockThreatIntelClient::with_reference_data();

        let r = client.lookup("192.168.1.100", IndicatorKind::Ip).await.unwrap();
        assert_eq!(r.reputation, Reputation::Suspicious);
        assert_eq!(r.confidence, 0.65);
        assert_eq!(r.category, "C2_server");
        assert_eq!(r.sources, vec![REFERENCE_SOURCE.to_string()]);

        let r = client.lookup("10.0.0.50", IndicatorKind::Ip).await.unwrap();
        assert_eq!(r.reputation, Reputation::Malicious);
        assert_eq!(r.confidence, 0.92);
    }

    #[tokio::test]
    async fn test_reference_domain_and_hash() {
        let client = MockThreatIntelClient::with_reference_data();

        let r = client
            .lookup("Malicious-Site.com", IndicatorKind::Domain)
            .await
            .unwrap();
        assert_eq!(r.category, "phishing");
        assert_eq!(r.indicator, "malicious-site.com");

        let r = client
            .lookup("d41d8cd98f00b204e9800998ecf8427e", IndicatorKind::Hash)
            .await
            .unwrap();
        assert_eq!(r.category, "ransomware");
        assert_eq!(r.confidence, 0.88);
    }

    #[tokio::test]
    async fn test_unknown_indicator() {
        let client = MockThreatIntelClient::with_reference_data();
        let r = client.lookup("8.8.8.8", IndicatorKind::Ip).await.unwrap();
        assert_eq!(r.reputation, Reputation::Unknown);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.category, "unknown");
    }

    #[tokio::test]
    async fn test_kind_is_part_of_the_key() {
        let client = MockThreatIntelClient::with_reference_data();
        let r = client.lookup("10.0.0.50", IndicatorKind::Domain).await.unwrap();
        assert_eq!(r.reputation, Reputation::Unknown);
    }

    #[tokio::test]
    async fn test_fail_after_behavior() {
        let client = MockThreatIntelClient::new("test");
        client
            .set_behavior(MockBehavior::FailAfter {
                calls: 2,
                error: ConnectorError::RateLimited(60),
            })
            .await;

        assert!(client.lookup("a.com", IndicatorKind::Domain).await.is_ok());
        assert!(client.lookup("b.com", IndicatorKind::Domain).await.is_ok());
        let err = client.lookup("c.com", IndicatorKind::Domain).await.unwrap_err();
        assert_eq!(err, ConnectorError::RateLimited(60));
        assert_eq!(client.get_call_count(), 3);
    }

    #[tokio::test]
    async fn test_fail_on_specific_indicator() {
        let client = MockThreatIntelClient::new("test");
        client
            .set_behavior(MockBehavior::FailOn {
                indicators: vec!["bad.com".to_string()],
                error: ConnectorError::Timeout("upstream".to_string()),
            })
            .await;

        assert!(client.lookup("good.com", IndicatorKind::Domain).await.is_ok());
        assert!(client.lookup("bad.com", IndicatorKind::Domain).await.is_err());

        let history = client.get_lookup_history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].indicator, "bad.com");
    }

    #[tokio::test]
    async fn test_health_reflects_behavior() {
        let client = MockThreatIntelClient::new("test");
        assert_eq!(client.health_check().await.unwrap(), ConnectorHealth::Healthy);

        client
            .set_behavior(MockBehavior::AlwaysFail(ConnectorError::Internal(
                "down".to_string(),
            )))
            .await;
        assert!(matches!(
            client.health_check().await.unwrap(),
            ConnectorHealth::Unhealthy(_)
        ));
    }
}
