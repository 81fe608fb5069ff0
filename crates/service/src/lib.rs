//! Metrics service: a thin facade the transports talk to.
//!
//! Adds call-site context to storage errors and nothing else; the store owns
//! the semantics. Handlers decide status codes by inspecting the wrapped
//! [`StorageError`].

use std::sync::Arc;

use pulse_model::{Metric, MetricKind};
use pulse_storage::{StorageError, Store};
use thiserror::Error;

/// A storage failure annotated with the operation that hit it.
#[derive(Debug, Error)]
#[error("{op}: {source}")]
pub struct ServiceError {
    op: &'static str,
    #[source]
    source: StorageError,
}

impl ServiceError {
    fn wrap(op: &'static str) -> impl FnOnce(StorageError) -> Self {
        move |source| Self { op, source }
    }

    /// The underlying storage error, for status mapping.
    pub fn storage(&self) -> &StorageError {
        &self.source
    }

    pub fn is_not_found(&self) -> bool {
        self.source.is_not_found()
    }
}

/// Facade over a [`Store`].
#[derive(Clone)]
pub struct MetricsService {
    store: Arc<dyn Store>,
}

impl MetricsService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get(&self, name: &str, kind: MetricKind) -> Result<Metric, ServiceError> {
        self.store
            .get(name, kind)
            .await
            .map_err(ServiceError::wrap("get metric"))
    }

    pub async fn get_all(&self) -> Result<Vec<Metric>, ServiceError> {
        self.store
            .get_all()
            .await
            .map_err(ServiceError::wrap("get all metrics"))
    }

    pub async fn store(&self, metric: &Metric) -> Result<(), ServiceError> {
        self.store
            .store(metric)
            .await
            .map_err(ServiceError::wrap("store metric"))
    }

    /// Store a batch. Empty batches succeed without touching the store.
    pub async fn store_many(&self, metrics: &[Metric]) -> Result<(), ServiceError> {
        if metrics.is_empty() {
            return Ok(());
        }
        self.store
            .store_many(metrics)
            .await
            .map_err(ServiceError::wrap("store batch"))
    }

    pub async fn store_many_with_retry(&self, metrics: &[Metric]) -> Result<(), ServiceError> {
        if metrics.is_empty() {
            return Ok(());
        }
        self.store
            .store_many_with_retry(metrics)
            .await
            .map_err(ServiceError::wrap("store batch with retry"))
    }

    pub async fn ping(&self) -> Result<(), ServiceError> {
        self.store.ping().await.map_err(ServiceError::wrap("ping"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_model::MetricValue;
    use pulse_storage::{MemoryStore, MemoryStoreOptions};
    use tokio_util::sync::CancellationToken;

    async fn service(dir: &tempfile::TempDir) -> MetricsService {
        let opts = MemoryStoreOptions {
            path: dir.path().join("metrics.log"),
            flush_interval: std::time::Duration::ZERO,
            restore: false,
            max_retry: 3,
        };
        let store = MemoryStore::open(opts, CancellationToken::new())
            .await
            .unwrap();
        MetricsService::new(Arc::new(store))
    }

    #[tokio::test]
    async fn passes_writes_through_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        svc.store(&Metric::counter("hits", 2)).await.unwrap();
        svc.store_many(&[Metric::counter("hits", 3)]).await.unwrap();

        let metric = svc.get("hits", MetricKind::Counter).await.unwrap();
        assert_eq!(metric.value, MetricValue::Counter(5));
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op_success() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;
        svc.store_many(&[]).await.unwrap();
        svc.store_many_with_retry(&[]).await.unwrap();
        assert!(svc.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wraps_errors_with_operation_context() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let err = svc.get("nope", MetricKind::Gauge).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("get metric:"));
    }

    #[tokio::test]
    async fn ping_reports_store_liveness() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;
        svc.ping().await.unwrap();
    }
}
