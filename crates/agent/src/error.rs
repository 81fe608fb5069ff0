//! Transport error types.

use thiserror::Error;

/// Errors from a single send attempt. All of them are retryable at the
/// agent; classification exists for logging, not for policy.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Batch could not be serialized
    #[error("encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    /// Payload encryption failed
    #[error("encrypt batch: {0}")]
    Encrypt(#[from] pulse_codec::CodecError),

    /// Payload compression failed
    #[error("compress batch: {0}")]
    Compress(#[from] std::io::Error),

    /// HTTP request failed
    #[error("post batch: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("server rejected batch: HTTP {0}")]
    Status(u16),

    /// RPC call failed
    #[error("rpc: {0}")]
    Rpc(#[from] tonic::Status),

    /// RPC channel could not be established
    #[error("rpc connect: {0}")]
    Connect(#[from] tonic::transport::Error),
}
