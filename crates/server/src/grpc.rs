//! gRPC transport: the `pulse.v1.Metrics` service.
//!
//! Checks mirror the HTTP middleware chain: the subnet guard runs as an
//! interceptor over the `real_ip` metadata, the signature check runs in the
//! handler against the re-encoded request (signing covers the protobuf
//! bytes, which are only available after decoding), and storage errors map
//! to `Internal`.

use std::sync::Arc;
use std::time::Instant;

use prost::Message;
use pulse_audit::{AuditRecord, Auditor};
use pulse_codec::Signer;
use pulse_proto::v1::metrics_server::{Metrics, MetricsServer};
use pulse_proto::v1::{UpdateMetricsRequest, UpdateMetricsResponse};
use pulse_proto::{convert, HASH_KEY, REAL_IP_KEY};
use pulse_service::MetricsService;
use tonic::service::interceptor::InterceptedService;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::subnet::{self, Ipv4Net};

/// gRPC service implementation.
pub struct MetricsGrpc {
    service: MetricsService,
    auditor: Arc<Auditor>,
    signer: Option<Signer>,
}

impl MetricsGrpc {
    pub fn new(service: MetricsService, auditor: Arc<Auditor>, signer: Option<Signer>) -> Self {
        Self {
            service,
            auditor,
            signer,
        }
    }

    /// Wrap the service with the subnet interceptor, ready for
    /// `Server::add_service`.
    pub fn into_server(
        self,
        trusted_subnet: Option<Ipv4Net>,
    ) -> InterceptedService<MetricsServer<MetricsGrpc>, SubnetInterceptor> {
        let interceptor = SubnetInterceptor {
            net: trusted_subnet,
        };
        MetricsServer::with_interceptor(self, interceptor)
    }

    fn check_signature(&self, req: &UpdateMetricsRequest, metadata: &tonic::metadata::MetadataMap) -> Result<(), Status> {
        let Some(signer) = &self.signer else {
            return Ok(());
        };

        let received = metadata
            .get(HASH_KEY)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let encoded = req.encode_to_vec();
        if !signer.verify(received, &encoded) {
            warn!("rpc signature mismatch");
            return Err(Status::data_loss("request signature mismatch"));
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl Metrics for MetricsGrpc {
    async fn update_metrics(
        &self,
        request: Request<UpdateMetricsRequest>,
    ) -> Result<Response<UpdateMetricsResponse>, Status> {
        let start = Instant::now();

        let ip = request
            .metadata()
            .get(REAL_IP_KEY)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        self.check_signature(request.get_ref(), request.metadata())?;

        let metrics = convert::from_request(request.get_ref())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        if !metrics.is_empty() {
            self.service
                .store_many_with_retry(&metrics)
                .await
                .map_err(|e| Status::internal(e.to_string()))?;

            self.auditor
                .update(AuditRecord::for_batch(&metrics, ip))
                .await;
        }

        info!(
            count = metrics.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "rpc batch stored"
        );
        Ok(Response::new(UpdateMetricsResponse {}))
    }
}

/// Rejects calls whose `real_ip` metadata falls outside the trusted subnet.
#[derive(Clone)]
pub struct SubnetInterceptor {
    net: Option<Ipv4Net>,
}

impl tonic::service::Interceptor for SubnetInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(net) = &self.net {
            let ip = request
                .metadata()
                .get(REAL_IP_KEY)
                .and_then(|v| v.to_str().ok());
            if !subnet::permits(net, ip) {
                return Err(Status::permission_denied(format!(
                    "not a trusted address: {}",
                    ip.unwrap_or("")
                )));
            }
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_model::{Metric, MetricKind, MetricValue};
    use pulse_storage::{MemoryStore, MemoryStoreOptions, Store};
    use tokio_util::sync::CancellationToken;
    use tonic::service::Interceptor;

    async fn grpc(dir: &tempfile::TempDir, signer: Option<Signer>) -> (MetricsGrpc, Arc<dyn Store>) {
        let opts = MemoryStoreOptions {
            path: dir.path().join("metrics.log"),
            flush_interval: std::time::Duration::ZERO,
            restore: false,
            max_retry: 3,
        };
        let store: Arc<dyn Store> = Arc::new(
            MemoryStore::open(opts, CancellationToken::new())
                .await
                .unwrap(),
        );
        let service = MetricsService::new(store.clone());
        (
            MetricsGrpc::new(service, Arc::new(Auditor::new()), signer),
            store,
        )
    }

    #[tokio::test]
    async fn stores_batch_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let (grpc, store) = grpc(&dir, None).await;
        let auditor = grpc.auditor.clone();

        let req = convert::to_request(&[Metric::counter("hits", 2), Metric::gauge("load", 0.5)]);
        let mut request = Request::new(req);
        request
            .metadata_mut()
            .insert(REAL_IP_KEY, "192.168.1.9".parse().unwrap());

        grpc.update_metrics(request).await.unwrap();

        let stored = store.get("hits", MetricKind::Counter).await.unwrap();
        assert_eq!(stored.value, MetricValue::Counter(2));

        let record = auditor.last().unwrap();
        assert_eq!(record.ip, "192.168.1.9");
        assert_eq!(record.metrics, vec!["hits", "load"]);
    }

    #[tokio::test]
    async fn bad_signature_is_data_loss() {
        let dir = tempfile::tempdir().unwrap();
        let (grpc, _) = grpc(&dir, Some(Signer::new("secret"))).await;

        let req = convert::to_request(&[Metric::counter("hits", 1)]);
        let mut request = Request::new(req);
        request
            .metadata_mut()
            .insert(HASH_KEY, "bogus".parse().unwrap());

        let status = grpc.update_metrics(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::DataLoss);
    }

    #[tokio::test]
    async fn valid_signature_passes() {
        let dir = tempfile::tempdir().unwrap();
        let signer = Signer::new("secret");
        let (grpc, store) = grpc(&dir, Some(signer.clone())).await;

        let req = convert::to_request(&[Metric::counter("hits", 4)]);
        let hash = signer.sign(&req.encode_to_vec());
        let mut request = Request::new(req);
        request
            .metadata_mut()
            .insert(HASH_KEY, hash.parse().unwrap());

        grpc.update_metrics(request).await.unwrap();
        assert_eq!(
            store.get("hits", MetricKind::Counter).await.unwrap().value,
            MetricValue::Counter(4)
        );
    }

    #[tokio::test]
    async fn unspecified_kind_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let (grpc, _) = grpc(&dir, None).await;

        let req = UpdateMetricsRequest {
            metrics: vec![pulse_proto::Metric {
                id: "x".into(),
                kind: 0,
                delta: 0,
                value: 0.0,
            }],
        };
        let status = grpc.update_metrics(Request::new(req)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn subnet_interceptor_rejects_outsiders() {
        let mut interceptor = SubnetInterceptor {
            net: Some("192.168.1.0/24".parse().unwrap()),
        };

        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(REAL_IP_KEY, "10.0.0.1".parse().unwrap());
        let status = interceptor.call(request).unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);

        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(REAL_IP_KEY, "192.168.1.50".parse().unwrap());
        assert!(interceptor.call(request).is_ok());

        // No metadata at all passes.
        assert!(interceptor.call(Request::new(())).is_ok());
    }
}
