//! File audit sink: one JSON record per line, appended.

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{AuditRecord, Observer};

/// Appends audit records to an open file. Write failures are logged and
/// dropped; the observer never fails its caller.
pub struct FileObserver {
    id: String,
    file: Mutex<File>,
}

impl FileObserver {
    /// Open (or create) the audit file in append mode.
    pub async fn open(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl Observer for FileObserver {
    fn id(&self) -> &str {
        &self.id
    }

    async fn update(&self, record: &AuditRecord) {
        let mut line = match serde_json::to_vec(record) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "serialize audit record");
                return;
            }
        };
        line.push(b'\n');

        let mut file = self.file.lock().await;
        if let Err(e) = file.write_all(&line).await {
            error!(error = %e, "write audit record");
            return;
        }
        if let Err(e) = file.flush().await {
            error!(error = %e, "flush audit file");
            return;
        }

        debug!("audit record written");
    }
}
