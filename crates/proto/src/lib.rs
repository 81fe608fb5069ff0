//! gRPC protocol types for the `pulse.v1.Metrics` service.
//!
//! `v1` holds the prost message types plus the tonic client/server glue in
//! the layout `tonic-build` emits; the module is committed instead of built
//! from `proto/pulse.proto` at compile time so the workspace has no `protoc`
//! dependency. [`convert`] maps between the wire types and `pulse_model`.

pub mod convert;
pub mod v1;

/// gRPC metadata key carrying the agent's address.
pub const REAL_IP_KEY: &str = "real_ip";

/// gRPC metadata key carrying the request signature.
pub const HASH_KEY: &str = "hash_256";

pub use v1::{Metric, MetricKind, UpdateMetricsRequest, UpdateMetricsResponse};
