//! Core metric types.

use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Closed set of metric kinds.
///
/// `Unknown` exists so path parsing can report a bad type without inventing
/// an entry; it is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MetricKind {
    #[default]
    Unknown,
    Gauge,
    Counter,
}

impl MetricKind {
    /// Parse the lowercase wire representation. Anything else maps to
    /// `Unknown` rather than an error, mirroring how the HTTP path form is
    /// validated (unknown type is a 400, decided by the caller).
    pub fn parse(s: &str) -> Self {
        match s {
            "gauge" => Self::Gauge,
            "counter" => Self::Counter,
            _ => Self::Unknown,
        }
    }

    /// Lowercase wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }

    /// Stable numeric form used as part of the relational primary key.
    pub fn as_i16(&self) -> i16 {
        match self {
            Self::Unknown => 0,
            Self::Gauge => 1,
            Self::Counter => 2,
        }
    }

    /// Inverse of [`MetricKind::as_i16`].
    pub fn from_i16(v: i16) -> Self {
        match v {
            1 => Self::Gauge,
            2 => Self::Counter,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::parse(s) {
            Self::Unknown => Err(ModelError::UnknownKind(s.to_string())),
            kind => Ok(kind),
        }
    }
}

/// A typed metric value.
///
/// Gauges replace on write; counters accumulate. The merge rule lives in the
/// stores, this type only carries the value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Counter(_) => MetricKind::Counter,
        }
    }

    /// Render the value the way the plain-text endpoints expect it:
    /// shortest round-trip decimal for gauges, base-10 for counters.
    pub fn render(&self) -> String {
        match self {
            Self::Gauge(v) => format!("{v}"),
            Self::Counter(d) => format!("{d}"),
        }
    }
}

/// A named metric. `(name, kind)` is the identity used by every store.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(delta),
        }
    }

    /// Build a metric from the URL path form `/{type}/{name}/{value}`.
    ///
    /// The caller has already checked the name is non-empty (empty name is a
    /// 404, not a 400, so it is decided before type parsing).
    pub fn from_path(kind: MetricKind, name: &str, raw: &str) -> Result<Self, ModelError> {
        let value = match kind {
            MetricKind::Gauge => {
                let v: f64 = raw.parse().map_err(|e: std::num::ParseFloatError| {
                    ModelError::ParseValue {
                        kind,
                        raw: raw.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                MetricValue::Gauge(v)
            }
            MetricKind::Counter => {
                let d: i64 = raw.parse().map_err(|e: std::num::ParseIntError| {
                    ModelError::ParseValue {
                        kind,
                        raw: raw.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                MetricValue::Counter(d)
            }
            MetricKind::Unknown => return Err(ModelError::UnknownKind(kind.to_string())),
        };

        Ok(Self {
            name: name.to_string(),
            value,
        })
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Identity key: `(name, kind)`.
    pub fn key(&self) -> (String, MetricKind) {
        (self.name.clone(), self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_strings() {
        assert_eq!(MetricKind::parse("gauge"), MetricKind::Gauge);
        assert_eq!(MetricKind::parse("counter"), MetricKind::Counter);
        assert_eq!(MetricKind::parse("histogram"), MetricKind::Unknown);
        assert_eq!(MetricKind::Gauge.as_str(), "gauge");
        assert!("histogram".parse::<MetricKind>().is_err());
    }

    #[test]
    fn kind_roundtrips_through_i16() {
        for kind in [MetricKind::Unknown, MetricKind::Gauge, MetricKind::Counter] {
            assert_eq!(MetricKind::from_i16(kind.as_i16()), kind);
        }
    }

    #[test]
    fn gauge_renders_shortest_form() {
        assert_eq!(Metric::gauge("load", 0.25).value.render(), "0.25");
        assert_eq!(Metric::gauge("load", 1.0).value.render(), "1");
        assert_eq!(Metric::counter("hits", 42).value.render(), "42");
    }

    #[test]
    fn from_path_parses_typed_values() {
        let g = Metric::from_path(MetricKind::Gauge, "load", "0.5").unwrap();
        assert_eq!(g.value, MetricValue::Gauge(0.5));

        let c = Metric::from_path(MetricKind::Counter, "hits", "7").unwrap();
        assert_eq!(c.value, MetricValue::Counter(7));

        assert!(Metric::from_path(MetricKind::Counter, "hits", "1.5").is_err());
        assert!(Metric::from_path(MetricKind::Gauge, "load", "abc").is_err());
    }
}
