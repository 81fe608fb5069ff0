//! Batch transports.
//!
//! Both transports apply the same security envelope in their own wire form:
//! HTTP posts `gzip(encrypt(json))` and signs the body as transmitted; gRPC
//! signs the encoded protobuf and carries the hash in metadata.

mod grpc;
mod http;

use async_trait::async_trait;
use pulse_model::Metric;

use crate::error::TransportError;

pub use grpc::GrpcTransport;
pub use http::HttpTransport;

/// One send attempt for a whole batch. Retry policy lives in the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError>;
}

/// The local address the OS would route to `server` from, if it is not
/// loopback. Connecting a UDP socket picks the source address without
/// sending anything.
pub(crate) fn local_ip(server: &str) -> Option<std::net::IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(server).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_loopback() {
        None
    } else {
        Some(ip)
    }
}
