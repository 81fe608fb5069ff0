//! Model error types.

use thiserror::Error;

/// Errors produced while validating or converting metrics.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The wire form carried a type string outside `gauge`/`counter`
    #[error("unknown metric type: {0:?}")]
    UnknownKind(String),

    /// The wire form did not carry the field its type requires
    #[error("metric {id:?}: missing {field} for type {kind}")]
    MissingValue {
        id: String,
        kind: crate::MetricKind,
        field: &'static str,
    },

    /// A metric name must be non-empty
    #[error("empty metric name")]
    EmptyName,

    /// A textual value could not be parsed for the metric kind
    #[error("parse {kind} value {raw:?}: {reason}")]
    ParseValue {
        kind: crate::MetricKind,
        raw: String,
        reason: String,
    },

    /// Host sampling failed (OS-level statistics unavailable)
    #[error("host sampling: {0}")]
    Sampling(String),
}
