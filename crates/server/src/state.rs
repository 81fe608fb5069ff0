//! Shared handler state.

use std::sync::Arc;

use pulse_audit::Auditor;
use pulse_codec::{GzipCodec, PrivateKey, Signer};
use pulse_service::MetricsService;

use crate::subnet::Ipv4Net;

/// Everything the HTTP layer needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub service: MetricsService,
    pub auditor: Arc<Auditor>,
    /// Configured secret; `None` disables signature verification
    pub signer: Option<Signer>,
    /// Configured private key; `None` disables body decryption
    pub private_key: Option<PrivateKey>,
    /// Shared gzip codec with its buffer pool
    pub gzip: GzipCodec,
    /// CIDR allowed to post batches; `None` admits everyone
    pub trusted_subnet: Option<Ipv4Net>,
}

impl AppState {
    pub fn new(service: MetricsService, auditor: Arc<Auditor>) -> Self {
        Self {
            service,
            auditor,
            signer: None,
            private_key: None,
            gzip: GzipCodec::default(),
            trusted_subnet: None,
        }
    }

    pub fn with_signer(mut self, signer: Option<Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_private_key(mut self, key: Option<PrivateKey>) -> Self {
        self.private_key = key;
        self
    }

    pub fn with_trusted_subnet(mut self, subnet: Option<Ipv4Net>) -> Self {
        self.trusted_subnet = subnet;
        self
    }
}
