//! Metric stores.
//!
//! Two backends implement the same [`Store`] contract:
//!
//! - [`MemoryStore`] — a `(name, kind)`-keyed map behind a reader-writer
//!   lock, with a periodic snapshot flusher and optional restore-on-open
//! - [`PostgresStore`] — a `metrics` table with an upsert that encodes the
//!   merge rule, transactional batches, and retry on connection-class errors
//!
//! The merge rule is shared: storing a gauge replaces the previous value,
//! storing a counter adds the delta to the accumulated value. `set` bypasses
//! the merge so replayed counters do not double-count: the in-memory backend
//! inserts only when the key is absent, the relational backend writes the
//! row verbatim.

pub mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use pulse_model::{Metric, MetricKind};

pub use error::StorageError;
pub use memory::{MemoryStore, MemoryStoreOptions};
pub use postgres::PostgresStore;

/// Common store contract.
///
/// All operations are async and cancel with their caller; none of them spawn
/// work that outlives the call except the flusher task owned by
/// [`MemoryStore`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Read one metric. Missing `(name, kind)` is [`StorageError::NotFound`].
    async fn get(&self, name: &str, kind: MetricKind) -> Result<Metric, StorageError>;

    /// Read every metric. The in-memory backend returns ascending name
    /// order; the relational backend returns rows unordered.
    async fn get_all(&self) -> Result<Vec<Metric>, StorageError>;

    /// Write one metric through the merge rule.
    async fn store(&self, metric: &Metric) -> Result<(), StorageError>;

    /// Write a batch. Empty input is a no-op success.
    async fn store_many(&self, metrics: &[Metric]) -> Result<(), StorageError>;

    /// Write a batch, retrying transient failures.
    async fn store_many_with_retry(&self, metrics: &[Metric]) -> Result<(), StorageError>;

    /// Write one metric bypassing the merge rule. Used by restore.
    async fn set(&self, metric: &Metric) -> Result<(), StorageError>;

    /// Backend liveness probe.
    async fn ping(&self) -> Result<(), StorageError>;
}
