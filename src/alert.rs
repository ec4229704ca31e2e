//! data structures for deserializing incoming alerts
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// the webhook payload could not be decoded into an [AlertBatch]
#[derive(Debug, Error)]
#[error("malformed alert batch: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
/// batch of alerts received by the alertmanager webhook receiver
#[allow(clippy::missing_docs_in_private_items)]
pub struct AlertBatch {
    pub alerts: Vec<Alert>,
    pub common_annotations: HashMap<String, Value>,
    pub common_labels: HashMap<String, Value>,
    pub group_labels: HashMap<String, Value>,
    #[serde(rename = "externalURL")]
    pub external_url: String,
    pub receiver: String,
    pub status: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
/// a single alert, republished verbatim onto the broker topic
#[allow(clippy::missing_docs_in_private_items)]
pub struct Alert {
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, Value>,
    pub starts_at: String,
    pub ends_at: String,
    #[serde(rename = "generatorURL")]
    pub generator_url: String,
}

impl AlertBatch {
    /// decode the raw webhook body
    ///
    /// missing fields default to empty values, unknown fields are ignored, type
    /// mismatches on known fields are an error
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_preserves_alert_order() {
        let payload = br#"{
            "alerts": [
                { "labels": { "alertname": "First" } },
                { "labels": { "alertname": "Second" } },
                { "labels": { "alertname": "Third" } }
            ],
            "status": "firing"
        }"#;

        let batch = AlertBatch::decode(payload).unwrap();

        assert_eq!(batch.alerts.len(), 3);
        let names: Vec<&str> = batch
            .alerts
            .iter()
            .map(|alert| alert.labels["alertname"].as_str())
            .collect();
        assert_eq!(names, ["First", "Second", "Third"]);
        assert_eq!(batch.status, "firing");
    }

    #[test]
    fn decode_tolerates_missing_fields() {
        let batch = AlertBatch::decode(br#"{"alerts":[{"labels":{"a":"b"}}]}"#).unwrap();

        assert_eq!(batch.alerts.len(), 1);
        assert!(batch.alerts[0].annotations.is_empty());
        assert_eq!(batch.alerts[0].starts_at, "");
        assert_eq!(batch.receiver, "");
        assert!(batch.group_labels.is_empty());
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let batch =
            AlertBatch::decode(br#"{"version":"4","groupKey":"{}:{}","alerts":[]}"#).unwrap();

        assert!(batch.alerts.is_empty());
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        assert!(AlertBatch::decode(br#"{"alerts":[{"labels":{"#).is_err());
    }

    #[test]
    fn decode_rejects_mistyped_fields() {
        assert!(AlertBatch::decode(br#"{"alerts":"not an array"}"#).is_err());
        assert!(AlertBatch::decode(br#"{"alerts":[{"labels":{"a":1}}]}"#).is_err());
    }

    #[test]
    fn reserialized_alert_preserves_labels() {
        let payload = br#"{
            "labels": { "alertname": "Foo", "severity": "critical" },
            "annotations": { "summary": "foo happened" },
            "startsAt": "2024-01-01T00:00:00Z",
            "endsAt": "",
            "generatorURL": "http://prometheus/graph"
        }"#;
        let alert: Alert = serde_json::from_slice(payload).unwrap();

        let reserialized = serde_json::to_vec(&alert).unwrap();
        let round_tripped: Alert = serde_json::from_slice(&reserialized).unwrap();

        assert_eq!(round_tripped.labels, alert.labels);
        assert_eq!(round_tripped.starts_at, "2024-01-01T00:00:00Z");
        assert_eq!(round_tripped.generator_url, "http://prometheus/graph");
    }
}
