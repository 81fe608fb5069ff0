//! External JSON representation.
//!
//! `{"id": "<name>", "type": "gauge"|"counter", "value": <f64>?, "delta": <i64>?}`
//!
//! Exactly one of `value`/`delta` is populated and must match `type`. The
//! same shape is used for single updates, batches (a JSON array), read
//! responses, and the snapshot file written by the in-memory store.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::metric::{Metric, MetricKind, MetricValue};

/// Wire form of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMetric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl From<&Metric> for WireMetric {
    fn from(m: &Metric) -> Self {
        let (delta, value) = match m.value {
            MetricValue::Gauge(v) => (None, Some(v)),
            MetricValue::Counter(d) => (Some(d), None),
        };
        Self {
            id: m.name.clone(),
            kind: m.kind().as_str().to_string(),
            delta,
            value,
        }
    }
}

impl TryFrom<WireMetric> for Metric {
    type Error = ModelError;

    fn try_from(w: WireMetric) -> Result<Self, Self::Error> {
        let kind = MetricKind::parse(&w.kind);
        let value = match kind {
            MetricKind::Gauge => {
                let v = w.value.ok_or(ModelError::MissingValue {
                    id: w.id.clone(),
                    kind,
                    field: "value",
                })?;
                MetricValue::Gauge(v)
            }
            MetricKind::Counter => {
                let d = w.delta.ok_or(ModelError::MissingValue {
                    id: w.id.clone(),
                    kind,
                    field: "delta",
                })?;
                MetricValue::Counter(d)
            }
            MetricKind::Unknown => return Err(ModelError::UnknownKind(w.kind)),
        };

        Ok(Metric {
            name: w.id,
            value,
        })
    }
}

/// Convert a batch to the wire form.
pub fn to_wire(metrics: &[Metric]) -> Vec<WireMetric> {
    metrics.iter().map(WireMetric::from).collect()
}

/// Convert a wire batch into model metrics, failing on the first bad entry.
pub fn from_wire(batch: Vec<WireMetric>) -> Result<Vec<Metric>, ModelError> {
    batch.into_iter().map(Metric::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_one_field_per_kind() {
        let g = WireMetric::from(&Metric::gauge("load", 0.5));
        assert_eq!(
            serde_json::to_string(&g).unwrap(),
            r#"{"id":"load","type":"gauge","value":0.5}"#
        );

        let c = WireMetric::from(&Metric::counter("hits", 3));
        assert_eq!(
            serde_json::to_string(&c).unwrap(),
            r#"{"id":"hits","type":"counter","delta":3}"#
        );
    }

    #[test]
    fn rejects_type_value_mismatch() {
        let w: WireMetric =
            serde_json::from_str(r#"{"id":"x","type":"gauge","delta":3}"#).unwrap();
        assert!(Metric::try_from(w).is_err());

        let w: WireMetric =
            serde_json::from_str(r#"{"id":"x","type":"counter","value":1.0}"#).unwrap();
        assert!(Metric::try_from(w).is_err());
    }

    #[test]
    fn rejects_unknown_type() {
        let w: WireMetric =
            serde_json::from_str(r#"{"id":"x","type":"timer","value":1.0}"#).unwrap();
        assert!(matches!(
            Metric::try_from(w),
            Err(ModelError::UnknownKind(_))
        ));
    }

    #[test]
    fn batch_roundtrip() {
        let metrics = vec![Metric::gauge("a", 1.0), Metric::counter("b", 2)];
        let wire = to_wire(&metrics);
        let json = serde_json::to_string(&wire).unwrap();
        let back = from_wire(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(back, metrics);
    }
}
