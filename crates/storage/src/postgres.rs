//! Relational store on Postgres.
//!
//! One table, `metrics(name, kind, gauge, counter)`, primary key
//! `(name, kind)`. The merge rule lives in the upsert: gauges take the
//! excluded value, counters add it. Batches run in a single transaction with
//! the statement prepared once and reused per row. Connection-class failures
//! (SQLSTATE class 08, socket and pool errors) are retried with an
//! arithmetic backoff; anything else surfaces immediately.

use std::time::Duration;

use pulse_model::{Metric, MetricKind, MetricValue};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::Store;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const UPSERT_MERGE: &str = "\
    INSERT INTO metrics (name, kind, gauge, counter)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (name, kind) DO UPDATE SET
        gauge = EXCLUDED.gauge,
        counter = metrics.counter + EXCLUDED.counter";

const UPSERT_REPLACE: &str = "\
    INSERT INTO metrics (name, kind, gauge, counter)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (name, kind) DO UPDATE SET
        gauge = EXCLUDED.gauge,
        counter = EXCLUDED.counter";

/// Postgres-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    max_retry: u32,
}

impl PostgresStore {
    /// Connect and run pending migrations.
    pub async fn connect(dsn: &str, max_retry: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(dsn)
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self {
            pool,
            max_retry: max_retry.max(1),
        })
    }

    /// Build a store over an existing pool (tests).
    pub fn with_pool(pool: PgPool, max_retry: u32) -> Self {
        Self {
            pool,
            max_retry: max_retry.max(1),
        }
    }

    fn bind_values(metric: &Metric) -> (f64, i64) {
        match metric.value {
            MetricValue::Gauge(v) => (v, 0),
            MetricValue::Counter(d) => (0.0, d),
        }
    }
}

fn row_to_metric(name: String, kind: i16, gauge: f64, counter: i64) -> Option<Metric> {
    match MetricKind::from_i16(kind) {
        MetricKind::Gauge => Some(Metric::gauge(name, gauge)),
        MetricKind::Counter => Some(Metric::counter(name, counter)),
        MetricKind::Unknown => None,
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn get(&self, name: &str, kind: MetricKind) -> Result<Metric, StorageError> {
        let row = sqlx::query(
            "SELECT gauge, counter FROM metrics WHERE name = $1 AND kind = $2 LIMIT 1",
        )
        .bind(name)
        .bind(kind.as_i16())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(StorageError::not_found(name, kind));
        };

        let gauge: f64 = row.try_get("gauge")?;
        let counter: i64 = row.try_get("counter")?;
        row_to_metric(name.to_string(), kind.as_i16(), gauge, counter)
            .ok_or_else(|| StorageError::not_found(name, kind))
    }

    async fn get_all(&self) -> Result<Vec<Metric>, StorageError> {
        let rows = sqlx::query("SELECT name, kind, gauge, counter FROM metrics")
            .fetch_all(&self.pool)
            .await?;

        let mut metrics = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let kind: i16 = row.try_get("kind")?;
            let gauge: f64 = row.try_get("gauge")?;
            let counter: i64 = row.try_get("counter")?;

            match row_to_metric(name, kind, gauge, counter) {
                Some(m) => metrics.push(m),
                None => warn!(kind, "skipping row with unknown metric kind"),
            }
        }
        Ok(metrics)
    }

    async fn store(&self, metric: &Metric) -> Result<(), StorageError> {
        let (gauge, counter) = Self::bind_values(metric);
        sqlx::query(UPSERT_MERGE)
            .bind(&metric.name)
            .bind(metric.kind().as_i16())
            .bind(gauge)
            .bind(counter)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn store_many(&self, metrics: &[Metric]) -> Result<(), StorageError> {
        if metrics.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let mut errors = Vec::new();
        for metric in metrics {
            let (gauge, counter) = Self::bind_values(metric);
            // Same SQL text every row: the statement is prepared once per
            // connection and reused.
            let result = sqlx::query(UPSERT_MERGE)
                .bind(&metric.name)
                .bind(metric.kind().as_i16())
                .bind(gauge)
                .bind(counter)
                .execute(&mut *tx)
                .await;
            if let Err(e) = result {
                errors.push(StorageError::Database(e));
            }
        }

        if errors.is_empty() {
            tx.commit().await?;
            Ok(())
        } else {
            // Dropping the transaction rolls it back.
            Err(StorageError::Batch(errors))
        }
    }

    async fn store_many_with_retry(&self, metrics: &[Metric]) -> Result<(), StorageError> {
        let mut last = match self.store_many(metrics).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => e,
            Err(e) => return Err(e),
        };

        for attempt in 0..self.max_retry {
            let delay = Duration::from_secs(u64::from(attempt) * 2 + 1);
            debug!(attempt = attempt + 1, ?delay, "retrying batch after transient failure");
            tokio::time::sleep(delay).await;

            match self.store_many(metrics).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => last = e,
                Err(e) => return Err(e),
            }
        }

        Err(StorageError::RetriesExhausted(Box::new(last)))
    }

    async fn set(&self, metric: &Metric) -> Result<(), StorageError> {
        let (gauge, counter) = Self::bind_values(metric);
        sqlx::query(UPSERT_REPLACE)
            .bind(&metric.name)
            .bind(metric.kind().as_i16())
            .bind(gauge)
            .bind(counter)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_conversion_follows_kind() {
        let g = row_to_metric("load".into(), MetricKind::Gauge.as_i16(), 1.5, 7).unwrap();
        assert_eq!(g.value, MetricValue::Gauge(1.5));

        let c = row_to_metric("hits".into(), MetricKind::Counter.as_i16(), 1.5, 7).unwrap();
        assert_eq!(c.value, MetricValue::Counter(7));

        assert!(row_to_metric("x".into(), 0, 0.0, 0).is_none());
    }

    #[test]
    fn bind_values_zero_the_other_column() {
        assert_eq!(
            PostgresStore::bind_values(&Metric::gauge("g", 2.5)),
            (2.5, 0)
        );
        assert_eq!(
            PostgresStore::bind_values(&Metric::counter("c", 4)),
            (0.0, 4)
        );
    }

    // Full behavior (upsert merge, transactional batches, retry-to-success
    // after a dropped connection) needs a live database:
    //
    //   DATABASE_DSN=postgres://... cargo test -p pulse-storage -- --ignored
    #[tokio::test]
    #[ignore = "needs a running Postgres, set DATABASE_DSN"]
    async fn upsert_merge_against_live_database() {
        let dsn = std::env::var("DATABASE_DSN").expect("DATABASE_DSN not set");
        let store = PostgresStore::connect(&dsn, 3).await.unwrap();

        let name = format!("it_hits_{}", std::process::id());
        store.store(&Metric::counter(&name, 2)).await.unwrap();
        store.store(&Metric::counter(&name, 3)).await.unwrap();

        let metric = store.get(&name, MetricKind::Counter).await.unwrap();
        assert_eq!(metric.value, MetricValue::Counter(5));

        store.set(&Metric::counter(&name, 1)).await.unwrap();
        let metric = store.get(&name, MetricKind::Counter).await.unwrap();
        assert_eq!(metric.value, MetricValue::Counter(1));
    }
}
