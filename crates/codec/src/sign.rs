//! HMAC-SHA256 request signing.
//!
//! Signatures travel in the `HashSHA256` HTTP header (or `hash_256` gRPC
//! metadata) as unpadded base64url text. Verification goes through the MAC
//! implementation's constant-time comparison.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Shared-secret signer.
#[derive(Clone)]
pub struct Signer {
    secret: Vec<u8>,
}

impl Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Sign `data`, returning the header value.
    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(data);
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Verify a received header value against `data`.
    ///
    /// Returns false for undecodable headers as well as mismatches; the
    /// caller treats both as a signature failure.
    pub fn verify(&self, received: &str, data: &[u8]) -> bool {
        let Ok(tag) = URL_SAFE_NO_PAD.decode(received) else {
            return false;
        };

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(data);
        mac.verify_slice(&tag).is_ok()
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("secret", &"[REDACTED]").finish()
    }
}
