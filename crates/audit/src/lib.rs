//! Post-write audit fan-out.
//!
//! After a successful batch write the server emits one [`AuditRecord`] to
//! the [`Auditor`], which invokes every registered [`Observer`] with it.
//! Fan-out is best-effort: sink failures are logged and never reach the
//! request path's result. The registry tolerates zero observers.

pub mod file;
pub mod url;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pulse_model::Metric;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

pub use file::FileObserver;
pub use url::UrlObserver;

/// One audit event: what was written, when, and by whom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub metrics: Vec<String>,
    #[serde(rename = "ip_address")]
    pub ip: String,
}

impl AuditRecord {
    /// Build a record for a stored batch, stamped with the current time.
    pub fn for_batch(metrics: &[Metric], ip: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            metrics: metrics.iter().map(|m| m.name.clone()).collect(),
            ip: ip.into(),
        }
    }
}

/// An audit sink. Implementations must swallow their own failures.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Stable identifier; registration is idempotent per id.
    fn id(&self) -> &str;

    /// Deliver one record.
    async fn update(&self, record: &AuditRecord);
}

/// Observer registry.
///
/// Registration happens during startup; [`Auditor::update`] runs on the
/// request path and invokes every observer synchronously.
#[derive(Default)]
pub struct Auditor {
    observers: Mutex<HashMap<String, Arc<dyn Observer>>>,
    last: Mutex<Option<AuditRecord>>,
}

impl Auditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. A second registration under the same id
    /// replaces the first.
    pub fn register(&self, observer: Arc<dyn Observer>) {
        let mut observers = self.observers.lock().expect("auditor lock poisoned");
        observers.insert(observer.id().to_string(), observer);
    }

    /// Remove an observer by id.
    pub fn deregister(&self, id: &str) {
        let mut observers = self.observers.lock().expect("auditor lock poisoned");
        observers.remove(id);
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.lock().expect("auditor lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most recently published record.
    pub fn last(&self) -> Option<AuditRecord> {
        self.last.lock().expect("auditor lock poisoned").clone()
    }

    /// Publish a record to every observer.
    pub async fn update(&self, record: AuditRecord) {
        let observers: Vec<Arc<dyn Observer>> = {
            let map = self.observers.lock().expect("auditor lock poisoned");
            map.values().cloned().collect()
        };

        *self.last.lock().expect("auditor lock poisoned") = Some(record.clone());

        for observer in observers {
            observer.update(&record).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObserver {
        id: String,
        seen: AtomicUsize,
    }

    #[async_trait]
    impl Observer for CountingObserver {
        fn id(&self) -> &str {
            &self.id
        }

        async fn update(&self, _record: &AuditRecord) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record() -> AuditRecord {
        AuditRecord {
            timestamp: 1_700_000_000,
            metrics: vec!["a".into(), "b".into()],
            ip: "10.0.0.1".into(),
        }
    }

    #[tokio::test]
    async fn update_with_no_observers_is_fine() {
        let auditor = Auditor::new();
        auditor.update(record()).await;
        assert_eq!(auditor.last().unwrap().ip, "10.0.0.1");
    }

    #[tokio::test]
    async fn update_reaches_every_observer() {
        let auditor = Auditor::new();
        let first = Arc::new(CountingObserver {
            id: "first".into(),
            seen: AtomicUsize::new(0),
        });
        let second = Arc::new(CountingObserver {
            id: "second".into(),
            seen: AtomicUsize::new(0),
        });
        auditor.register(first.clone());
        auditor.register(second.clone());

        auditor.update(record()).await;
        auditor.update(record()).await;

        assert_eq!(first.seen.load(Ordering::SeqCst), 2);
        assert_eq!(second.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn register_is_idempotent_by_id() {
        let auditor = Auditor::new();
        let a = Arc::new(CountingObserver {
            id: "dup".into(),
            seen: AtomicUsize::new(0),
        });
        let b = Arc::new(CountingObserver {
            id: "dup".into(),
            seen: AtomicUsize::new(0),
        });
        auditor.register(a.clone());
        auditor.register(b.clone());
        assert_eq!(auditor.len(), 1);

        auditor.update(record()).await;
        // Only the replacement sees the record.
        assert_eq!(a.seen.load(Ordering::SeqCst), 0);
        assert_eq!(b.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deregister_removes_sink() {
        let auditor = Auditor::new();
        let obs = Arc::new(CountingObserver {
            id: "gone".into(),
            seen: AtomicUsize::new(0),
        });
        auditor.register(obs.clone());
        auditor.deregister("gone");

        auditor.update(record()).await;
        assert_eq!(obs.seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn record_serializes_with_wire_names() {
        let json = serde_json::to_string(&record()).unwrap();
        assert_eq!(
            json,
            r#"{"ts":1700000000,"metrics":["a","b"],"ip_address":"10.0.0.1"}"#
        );
    }

    #[test]
    fn record_for_batch_collects_names_in_order() {
        let batch = vec![
            pulse_model::Metric::gauge("x", 1.0),
            pulse_model::Metric::counter("y", 2),
        ];
        let record = AuditRecord::for_batch(&batch, "127.0.0.1");
        assert_eq!(record.metrics, vec!["x", "y"]);
        assert!(record.timestamp > 0);
    }
}
