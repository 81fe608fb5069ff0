//! URL audit sink: POSTs each record as JSON.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{AuditRecord, Observer};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// POSTs audit records to a configured endpoint. Delivery failures are
/// logged and dropped.
pub struct UrlObserver {
    id: String,
    url: String,
    client: reqwest::Client,
}

impl UrlObserver {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            client,
        }
    }

    /// Override the HTTP client (tests use a short timeout).
    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl Observer for UrlObserver {
    fn id(&self) -> &str {
        &self.id
    }

    async fn update(&self, record: &AuditRecord) {
        match self.client.post(&self.url).json(record).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(url = %self.url, "audit record delivered");
            }
            Ok(response) => {
                error!(url = %self.url, status = %response.status(), "audit endpoint rejected record");
            }
            Err(e) => {
                error!(url = %self.url, error = %e, "send audit record");
            }
        }
    }
}
