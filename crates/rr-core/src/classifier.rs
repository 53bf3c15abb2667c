//! Severity classification.
//!
//! Scoring is a pure function of the alert and its enrichments. With several
//! enrichments the worst reputation and the highest confidence are taken
//! independently, then scored as if they came from one lookup.

use crate::incident::{Alert, Severity, SeverityVerdict};
use rr_connectors::{EnrichmentResult, Reputation};

/// Points added when any enrichment is malicious.
pub const MALICIOUS_POINTS: f64 = 50.0;
/// Points added when the worst enrichment is suspicious.
pub const SUSPICIOUS_POINTS: f64 = 30.0;
/// Multiplier applied to the highest confidence.
pub const CONFIDENCE_WEIGHT: f64 = 30.0;

pub const CRITICAL_THRESHOLD: f64 = 80.0;
pub const HIGH_THRESHOLD: f64 = 60.0;
pub const MEDIUM_THRESHOLD: f64 = 40.0;

/// Pluggable scoring function used by the workflow engine.
///
/// Implementations must be deterministic: the same inputs always give the
/// same verdict.
pub trait SeverityScorer: Send + Sync {
    fn classify(&self, alert: &Alert, enrichments: &[EnrichmentResult]) -> SeverityVerdict;
}

/// The default threshold-based classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeverityClassifier;

impl SeverityClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Maps a score to its tier, highest threshold first.
    pub fn severity_for(score: f64) -> Severity {
        if score >= CRITICAL_THRESHOLD {
            Severity::Critical
        } else if score >= HIGH_THRESHOLD {
            Severity::High
        } else if score >= MEDIUM_THRESHOLD {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl SeverityScorer for SeverityClassifier {
    fn classify(&self, _alert: &Alert, enrichments: &[EnrichmentResult]) -> SeverityVerdict {
        let worst = enrichments
            .iter()
            .map(|e| e.reputation)
            .max()
            .unwrap_or(Reputation::Unknown);
        let max_confidence = enrichments
            .iter()
            .map(|e| e.confidence)
            .fold(0.0_f64, f64::max);

        let mut score = 0.0;
        let mut reasons = Vec::new();

        match worst {
            Reputation::Malicious => {
                score += MALICIOUS_POINTS;
                reasons.push(format!("malicious reputation (+{})", MALICIOUS_POINTS));
            }
            Reputation::Suspicious => {
                score += SUSPICIOUS_POINTS;
                reasons.push(format!("suspicious reputation (+{})", SUSPICIOUS_POINTS));
            }
            Reputation::Benign | Reputation::Unknown => {
                reasons.push(format!("{} reputation (+0)", worst));
            }
        }

        let confidence_points = round(max_confidence * CONFIDENCE_WEIGHT);
        score = round(score + confidence_points);
        reasons.push(format!(
            "max confidence {} (+{})",
            max_confidence, confidence_points
        ));

        let severity = Self::severity_for(score);
        SeverityVerdict {
            severity,
            score,
            requires_approval: severity >= Severity::High,
            reasons,
        }
    }
}

// Strips float noise such as 27.599999999999998 so stored scores are stable.
fn round(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
