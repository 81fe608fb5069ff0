//! HTTP transport: POST the batch to `/updates/`.

use std::time::Duration;

use async_trait::async_trait;
use pulse_codec::{GzipCodec, PublicKey, Signer};
use pulse_model::{wire, Metric};
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{local_ip, Transport};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Ships batches as signed, encrypted, gzipped JSON.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    ip: String,
    signer: Option<Signer>,
    public_key: Option<PublicKey>,
    gzip: GzipCodec,
}

impl HttpTransport {
    pub fn new(address: &str, signer: Option<Signer>, public_key: Option<PublicKey>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        let ip = local_ip(address)
            .map(|ip| ip.to_string())
            .unwrap_or_default();

        Self {
            client,
            url: format!("http://{address}/updates/"),
            ip,
            signer,
            public_key,
            gzip: GzipCodec::default(),
        }
    }

    /// Build the wire body: JSON, optionally encrypted, then gzipped.
    fn build_body(&self, metrics: &[Metric]) -> Result<Vec<u8>, TransportError> {
        let json = serde_json::to_vec(&wire::to_wire(metrics))?;

        let payload = match &self.public_key {
            Some(key) => key.encrypt(&json)?,
            None => json,
        };

        Ok(self.gzip.compress(&payload)?.to_vec())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        if metrics.is_empty() {
            return Ok(());
        }

        let body = self.build_body(metrics)?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Content-Encoding", "gzip");

        if !self.ip.is_empty() {
            request = request.header("X-Real-IP", &self.ip);
        }

        if let Some(signer) = &self.signer {
            // Sign the body exactly as it goes on the wire.
            request = request.header("HashSHA256", signer.sign(&body));
        }

        let response = match request.body(body).send().await {
            Ok(r) => r,
            Err(e) if is_end_of_stream(&e) => {
                debug!("server closed the stream early, treating as delivered");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        debug!(count = metrics.len(), "batch delivered");
        Ok(())
    }
}

/// Whether the error is the server hanging up after consuming the request.
fn is_end_of_stream(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(hyper_err) = inner.downcast_ref::<hyper::Error>() {
            if hyper_err.is_incomplete_message() {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_codec::PrivateKey;

    #[test]
    fn body_is_gzipped_json() {
        let transport = HttpTransport::new("localhost:8080", None, None);
        let body = transport
            .build_body(&[Metric::gauge("load", 1.5), Metric::counter("hits", 2)])
            .unwrap();

        let decoded = GzipCodec::default().decompress(&body).unwrap();
        let text = String::from_utf8(decoded.to_vec()).unwrap();
        assert_eq!(
            text,
            r#"[{"id":"load","type":"gauge","value":1.5},{"id":"hits","type":"counter","delta":2}]"#
        );
    }

    #[test]
    fn encrypted_body_unwraps_with_the_private_key() {
        let dir = tempfile::tempdir().unwrap();
        let (private_path, public_path) = pulse_codec::generate_keys(dir.path()).unwrap();
        let public = PublicKey::from_pem_file(public_path).unwrap();
        let private = PrivateKey::from_pem_file(private_path).unwrap();

        let transport = HttpTransport::new("localhost:8080", None, Some(public));
        let body = transport.build_body(&[Metric::counter("hits", 1)]).unwrap();

        let encrypted = GzipCodec::default().decompress(&body).unwrap();
        let json = private.decrypt(&encrypted).unwrap();
        assert_eq!(
            String::from_utf8(json).unwrap(),
            r#"[{"id":"hits","type":"counter","delta":1}]"#
        );
    }

    #[tokio::test]
    async fn posts_signed_envelope_to_updates() {
        use axum::extract::State;
        use axum::http::HeaderMap;
        use axum::routing::post;
        use axum::Router;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let hits = Arc::new(AtomicUsize::new(0));
        let app_hits = hits.clone();
        let signer = Signer::new("secret");
        let check_signer = signer.clone();

        let app = Router::new()
            .route(
                "/updates/",
                post(
                    move |State(hits): State<Arc<AtomicUsize>>,
                          headers: HeaderMap,
                          body: axum::body::Bytes| {
                        let signer = check_signer.clone();
                        async move {
                            let hash = headers.get("HashSHA256").unwrap().to_str().unwrap();
                            assert!(signer.verify(hash, &body));
                            assert_eq!(
                                headers.get("Content-Encoding").unwrap().to_str().unwrap(),
                                "gzip"
                            );
                            hits.fetch_add(1, Ordering::SeqCst);
                            "ok"
                        }
                    },
                ),
            )
            .with_state(app_hits);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let transport = HttpTransport::new(&addr.to_string(), Some(signer), None);
        transport
            .send(&[Metric::counter("hits", 1)])
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_server_is_an_error() {
        let transport = HttpTransport::new("127.0.0.1:1", None, None);
        assert!(transport.send(&[Metric::counter("x", 1)]).await.is_err());
    }

    #[tokio::test]
    async fn empty_batch_sends_nothing() {
        // Would fail if it tried to reach this address.
        let transport = HttpTransport::new("127.0.0.1:1", None, None);
        transport.send(&[]).await.unwrap();
    }
}
