//! gRPC transport: one `UpdateMetrics` call per batch.

use async_trait::async_trait;
use prost::Message;
use pulse_codec::Signer;
use pulse_model::Metric;
use pulse_proto::v1::metrics_client::MetricsClient;
use pulse_proto::{convert, HASH_KEY, REAL_IP_KEY};
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{local_ip, Transport};

/// Ships batches over a shared channel. The signature covers the encoded
/// request message and travels as `hash_256` metadata.
pub struct GrpcTransport {
    client: Mutex<MetricsClient<Channel>>,
    ip: String,
    signer: Option<Signer>,
}

impl GrpcTransport {
    /// Connect to `address` (`host:port`).
    pub async fn connect(address: &str, signer: Option<Signer>) -> Result<Self, TransportError> {
        let client = MetricsClient::connect(format!("http://{address}")).await?;
        let ip = local_ip(address)
            .map(|ip| ip.to_string())
            .unwrap_or_default();

        Ok(Self {
            client: Mutex::new(client),
            ip,
            signer,
        })
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        if metrics.is_empty() {
            return Ok(());
        }

        let message = convert::to_request(metrics);
        let mut request = tonic::Request::new(message);

        if !self.ip.is_empty() {
            if let Ok(value) = self.ip.parse() {
                request.metadata_mut().insert(REAL_IP_KEY, value);
            }
        }

        if let Some(signer) = &self.signer {
            let hash = signer.sign(&request.get_ref().encode_to_vec());
            if let Ok(value) = hash.parse() {
                request.metadata_mut().insert(HASH_KEY, value);
            }
        }

        let mut client = self.client.lock().await;
        client.update_metrics(request).await?;

        debug!(count = metrics.len(), "batch delivered over rpc");
        Ok(())
    }
}
