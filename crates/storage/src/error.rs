//! Storage error taxonomy.

use pulse_model::MetricKind;
use thiserror::Error;

/// Errors surfaced by the stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Key absent on read
    #[error("metric {kind}/{name} not found")]
    NotFound { name: String, kind: MetricKind },

    /// Snapshot file I/O failed
    #[error("snapshot file: {0}")]
    Snapshot(#[from] std::io::Error),

    /// Snapshot line could not be encoded
    #[error("encode snapshot line: {0}")]
    Encode(#[from] serde_json::Error),

    /// Database operation failed
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed on open
    #[error("migrate: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Several per-item batch failures, joined
    #[error("{}", join_batch(.0))]
    Batch(Vec<StorageError>),

    /// Retry budget exhausted; carries the last attempt's error
    #[error("retry limit reached: {0}")]
    RetriesExhausted(Box<StorageError>),
}

impl StorageError {
    pub fn not_found(name: impl Into<String>, kind: MetricKind) -> Self {
        Self::NotFound {
            name: name.into(),
            kind,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the error is a connection-class database failure worth
    /// retrying. Postgres connection exceptions are SQLSTATE class `08`;
    /// pool-level and socket-level failures count as well.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => match e {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db) => {
                    db.code().is_some_and(|code| code.starts_with("08"))
                }
                _ => false,
            },
            Self::Batch(errors) => errors.iter().any(StorageError::is_transient),
            Self::RetriesExhausted(inner) => inner.is_transient(),
            _ => false,
        }
    }
}

fn join_batch(errors: &[StorageError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
