//! Pulse agent.
//!
//! Samples host metrics on a poll tick and ships them to the server on a
//! report tick through a small pool of sender workers:
//!
//! ```text
//! ┌──────────┐ drop-on-full ┌──────────┐  blocking   ┌───────────┐
//! │ poll task│─────────────▶│report    │────────────▶│ sender ×N │──▶ HTTP / gRPC
//! │ (sample) │  (latest)    │task      │ (work chan) │ (retry)   │
//! └──────────┘              └──────────┘             └───────────┘
//! ```
//!
//! The poll side never blocks: if the report task has not consumed the
//! previous snapshot, the new one is dropped and counted. The report side
//! does block on the work channel, so at most one batch is in flight per
//! worker. Every task selects on the cancellation token.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod transport;

pub use config::AgentConfig;
pub use error::TransportError;
pub use pipeline::Agent;
pub use transport::{GrpcTransport, HttpTransport, Transport};
