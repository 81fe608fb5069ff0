//! Conversions between wire types and the model.

use pulse_model::{Metric, MetricValue, ModelError};

use crate::v1;

impl From<&Metric> for v1::Metric {
    fn from(m: &Metric) -> Self {
        match m.value {
            MetricValue::Gauge(v) => Self {
                id: m.name.clone(),
                kind: v1::MetricKind::Gauge as i32,
                delta: 0,
                value: v,
            },
            MetricValue::Counter(d) => Self {
                id: m.name.clone(),
                kind: v1::MetricKind::Counter as i32,
                delta: d,
                value: 0.0,
            },
        }
    }
}

impl TryFrom<&v1::Metric> for Metric {
    type Error = ModelError;

    fn try_from(m: &v1::Metric) -> Result<Self, Self::Error> {
        match v1::MetricKind::try_from(m.kind) {
            Ok(v1::MetricKind::Gauge) => Ok(Metric::gauge(m.id.clone(), m.value)),
            Ok(v1::MetricKind::Counter) => Ok(Metric::counter(m.id.clone(), m.delta)),
            _ => Err(ModelError::UnknownKind(format!("enum value {}", m.kind))),
        }
    }
}

/// Build the RPC request for a batch.
pub fn to_request(metrics: &[Metric]) -> v1::UpdateMetricsRequest {
    v1::UpdateMetricsRequest {
        metrics: metrics.iter().map(v1::Metric::from).collect(),
    }
}

/// Decode an RPC request into model metrics, failing on the first bad entry.
pub fn from_request(req: &v1::UpdateMetricsRequest) -> Result<Vec<Metric>, ModelError> {
    req.metrics.iter().map(Metric::try_from).collect()
}
