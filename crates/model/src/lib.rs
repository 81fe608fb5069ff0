//! Pulse data model.
//!
//! Defines the two metric kinds the pipeline moves around:
//!
//! - **Gauge** — a 64-bit float, replaced on every write
//! - **Counter** — a 64-bit signed delta, accumulated on write
//!
//! A metric is identified by the pair `(name, kind)`; a gauge named `X` and a
//! counter named `X` are distinct entries everywhere in the system.
//!
//! The [`wire`] module holds the external JSON representation exchanged with
//! the server (`{"id", "type", "delta"?, "value"?}`), and [`collect`] holds the
//! host sampler used by the agent.

pub mod collect;
pub mod error;
pub mod metric;
pub mod runtime_alloc;
pub mod wire;

pub use collect::HostCollector;
pub use error::ModelError;
pub use metric::{Metric, MetricKind, MetricValue};
pub use wire::WireMetric;
