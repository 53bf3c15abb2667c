//! Alert normalization.
//!
//! Turns a request body in either accepted shape into an [`Alert`]. The
//! legacy shape is recognised by its snake_case `alert_id` key.

use rr_connectors::IndicatorKind;
use rr_core::{Alert, Indicator};
use serde::de::DeserializeOwned;
use serde_json::Value;
use validator::Validate;

use crate::dto::{AlertPayload, IndicatorPayload, LegacyAlertPayload};
use crate::error::{ApiError, ValidationErrorDetails};

const MAX_INDICATORS: usize = 64;

/// Parses and validates an alert body.
pub fn parse_alert(body: &[u8]) -> Result<Alert, ApiError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON payload: {e}")))?;
    if !value.is_object() {
        return Err(ApiError::BadRequest(
            "Alert payload must be a JSON object".to_string(),
        ));
    }

    if value.get("alert_id").is_some() {
        let payload: LegacyAlertPayload = decode(value)?;
        payload.validate()?;
        normalize_legacy(payload)
    } else {
        let payload: AlertPayload = decode(value)?;
        payload.validate()?;
        normalize_canonical(payload)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::BadRequest(format!("Invalid alert payload: {e}")))
}

fn normalize_canonical(payload: AlertPayload) -> Result<Alert, ApiError> {
    let source_indicator = indicator_from_payload("sourceIndicator", &payload.source_indicator)?;
    let raw_indicators = payload
        .raw_indicators
        .iter()
        .map(|i| indicator_from_payload("rawIndicators", i))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Alert {
        alert_id: payload.alert_id.trim().to_string(),
        alert_type: payload.alert_type,
        source_indicator,
        observed_at: payload.observed_at,
        raw_indicators,
        host: payload.host,
    })
}

fn indicator_from_payload(field: &str, payload: &IndicatorPayload) -> Result<Indicator, ApiError> {
    let kind = payload.kind.parse::<IndicatorKind>().map_err(|_| {
        ApiError::validation_field(
            field,
            "unknown_kind",
            &format!("Unknown indicator kind '{}'", payload.kind),
        )
    })?;
    build_indicator(field, &payload.value, kind)
}

fn build_indicator(field: &str, value: &str, kind: IndicatorKind) -> Result<Indicator, ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::validation_field(
            field,
            "empty",
            "Indicator value cannot be blank",
        ));
    }
    Ok(Indicator::new(value, kind))
}

/// Maps a legacy indicator key to its kind.
fn legacy_kind(key: &str) -> Option<IndicatorKind> {
    match key.to_ascii_lowercase().as_str() {
        "file_hash" | "hash" | "sha256" | "sha1" | "md5" => Some(IndicatorKind::Hash),
        "domain" => Some(IndicatorKind::Domain),
        "ip" | "source_ip" | "dest_ip" => Some(IndicatorKind::Ip),
        _ => None,
    }
}

fn normalize_legacy(payload: LegacyAlertPayload) -> Result<Alert, ApiError> {
    let mut details = ValidationErrorDetails::new();
    let mut indicators = Vec::new();

    for (key, value) in &payload.indicators {
        let field = format!("indicators.{key}");
        let Some(kind) = legacy_kind(key) else {
            details.add_error(&field, "unknown_indicator", &format!("Unknown indicator key '{key}'"));
            continue;
        };
        let values: Vec<&str> = match value {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) if items.iter().all(Value::is_string) => {
                items.iter().filter_map(Value::as_str).collect()
            }
            _ => {
                details.add_error(&field, "invalid_type", "Expected a string or list of strings");
                continue;
            }
        };
        for v in values {
            if v.trim().is_empty() {
                details.add_error(&field, "empty", "Indicator value cannot be blank");
            } else {
                indicators.push(Indicator::new(v, kind));
            }
        }
    }

    if indicators.len() > MAX_INDICATORS {
        details.add_error(
            "indicators",
            "length",
            &format!("At most {MAX_INDICATORS} indicators are accepted"),
        );
    }
    if !details.is_empty() {
        return Err(details.into());
    }

    let source_indicator = match &payload.source_ip {
        Some(ip) => build_indicator("source_ip", ip, IndicatorKind::Ip)?,
        None => pick_source(&indicators).ok_or_else(|| {
            ApiError::validation_field(
                "source_ip",
                "required",
                "source_ip or at least one indicator is required",
            )
        })?,
    };
    indicators.retain(|i| *i != source_indicator);

    Ok(Alert {
        alert_id: payload.alert_id.trim().to_string(),
        alert_type: payload.alert_type,
        source_indicator,
        observed_at: payload.timestamp,
        raw_indicators: indicators,
        host: payload.host,
    })
}

/// Without a `source_ip`, the source is the first ip, then domain, then hash.
fn pick_source(indicators: &[Indicator]) -> Option<Indicator> {
    [IndicatorKind::Ip, IndicatorKind::Domain, IndicatorKind::Hash]
        .into_iter()
        .find_map(|kind| indicators.iter().find(|i| i.kind == kind).cloned())
}
