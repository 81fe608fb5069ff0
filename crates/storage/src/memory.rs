//! In-memory store with snapshot persistence.
//!
//! State is a `(name, kind)` map behind an async reader-writer lock. A
//! backing file (append mode, created if absent) receives a full snapshot on
//! every flusher tick, one wire-form JSON metric per line. On open with
//! restore enabled the file is replayed top to bottom; later lines override
//! earlier ones, so the newest flush wins.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pulse_model::{Metric, MetricKind, MetricValue, WireMetric};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::StorageError;
use crate::Store;

/// Options for [`MemoryStore::open`].
#[derive(Debug, Clone)]
pub struct MemoryStoreOptions {
    /// Snapshot file path
    pub path: PathBuf,
    /// Flush period; zero disables the flusher
    pub flush_interval: Duration,
    /// Replay the snapshot file on open
    pub restore: bool,
    /// Attempts for `store_many_with_retry`
    pub max_retry: u32,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("metrics.log"),
            flush_interval: Duration::from_secs(300),
            restore: false,
            max_retry: 3,
        }
    }
}

type MetricMap = HashMap<(String, MetricKind), Metric>;

struct Inner {
    metrics: RwLock<MetricMap>,
    file: Mutex<File>,
    max_retry: u32,
}

/// In-memory store. Clones share state; the flusher task holds one.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Open the backing file (creating it if needed), optionally replay it,
    /// and start the flusher when an interval is configured. The flusher
    /// stops when `cancel` fires.
    pub async fn open(
        opts: MemoryStoreOptions,
        cancel: CancellationToken,
    ) -> Result<Self, StorageError> {
        let mut metrics = MetricMap::new();

        if opts.restore {
            restore_from(&opts.path, &mut metrics).await?;
            info!(
                path = %opts.path.display(),
                restored = metrics.len(),
                "restored metrics from snapshot"
            );
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&opts.path)
            .await?;

        let store = Self {
            inner: Arc::new(Inner {
                metrics: RwLock::new(metrics),
                file: Mutex::new(file),
                max_retry: opts.max_retry.max(1),
            }),
        };

        if opts.flush_interval > Duration::ZERO {
            info!(interval = ?opts.flush_interval, "starting snapshot flusher");
            tokio::spawn(store.clone().run_flusher(opts.flush_interval, cancel));
        }

        Ok(store)
    }

    /// Append one full snapshot to the backing file.
    ///
    /// Holds the exclusive lock for the duration of the write so the
    /// snapshot is a consistent point-in-time view.
    pub async fn flush_once(&self) -> Result<(), StorageError> {
        let metrics = self.inner.metrics.write().await;

        let mut lines = String::new();
        for metric in metrics.values() {
            let line = serde_json::to_string(&WireMetric::from(metric))?;
            lines.push_str(&line);
            lines.push('\n');
        }

        let mut file = self.inner.file.lock().await;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;

        debug!(entries = metrics.len(), "snapshot flushed");
        Ok(())
    }

    async fn run_flusher(self, period: Duration, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("flusher stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.flush_once().await {
                        error!(error = %e, "snapshot flush failed");
                    }
                }
            }
        }
    }

    fn merge(existing: &mut Metric, incoming: &Metric) {
        match (&mut existing.value, &incoming.value) {
            (MetricValue::Gauge(current), MetricValue::Gauge(new)) => *current = *new,
            (MetricValue::Counter(total), MetricValue::Counter(delta)) => *total += delta,
            // Kinds are part of the key, so a mismatch cannot reach here.
            _ => unreachable!("metric kind mismatch under identical key"),
        }
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get(&self, name: &str, kind: MetricKind) -> Result<Metric, StorageError> {
        let metrics = self.inner.metrics.read().await;
        metrics
            .get(&(name.to_string(), kind))
            .cloned()
            .ok_or_else(|| StorageError::not_found(name, kind))
    }

    async fn get_all(&self) -> Result<Vec<Metric>, StorageError> {
        let metrics = self.inner.metrics.read().await;
        let mut all: Vec<Metric> = metrics.values().cloned().collect();
        all.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then(a.kind().as_i16().cmp(&b.kind().as_i16()))
        });
        Ok(all)
    }

    async fn store(&self, metric: &Metric) -> Result<(), StorageError> {
        let mut metrics = self.inner.metrics.write().await;
        match metrics.get_mut(&metric.key()) {
            Some(existing) => Self::merge(existing, metric),
            None => {
                metrics.insert(metric.key(), metric.clone());
            }
        }
        Ok(())
    }

    async fn store_many(&self, metrics: &[Metric]) -> Result<(), StorageError> {
        if metrics.is_empty() {
            debug!("empty batch, nothing to store");
            return Ok(());
        }

        let mut errors = Vec::new();
        for metric in metrics {
            if let Err(e) = self.store(metric).await {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Batch(errors))
        }
    }

    async fn store_many_with_retry(&self, metrics: &[Metric]) -> Result<(), StorageError> {
        // In-memory failures are deterministic; the retry loop exists to keep
        // the contract uniform with the relational backend and has no sleep.
        match self.store_many(metrics).await {
            Ok(()) => Ok(()),
            Err(mut last) => {
                for attempt in 1..=self.inner.max_retry {
                    debug!(attempt, "retrying batch store");
                    match self.store_many(metrics).await {
                        Ok(()) => return Ok(()),
                        Err(e) => last = e,
                    }
                }
                Err(StorageError::RetriesExhausted(Box::new(last)))
            }
        }
    }

    async fn set(&self, metric: &Metric) -> Result<(), StorageError> {
        let mut metrics = self.inner.metrics.write().await;
        metrics.entry(metric.key()).or_insert_with(|| metric.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Replay a snapshot file into `metrics`. Unparseable lines are logged and
/// skipped; a missing file is an empty store.
async fn restore_from(path: &PathBuf, metrics: &mut MetricMap) -> Result<(), StorageError> {
    let file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut lines = BufReader::new(file).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let metric = match serde_json::from_str::<WireMetric>(&line)
            .map_err(StorageError::from)
            .and_then(|w| Metric::try_from(w).map_err(|e| {
                StorageError::Snapshot(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, line = %line, "skipping unparseable snapshot line");
                continue;
            }
        };
        metrics.insert(metric.key(), metric);
    }

    Ok(())
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;
