//! Stateless codecs shared by the agent and the server.
//!
//! - [`sign`] — HMAC-SHA256 request signing with base64url output
//! - [`cipher`] — RSA-OAEP(SHA-256) payload encryption and PKCS#1 PEM keys
//! - [`gzip`] — gzip with pooled scratch buffers
//!
//! These are the three layers of the wire envelope: the agent applies
//! JSON → encrypt → gzip and signs the result; the server middleware peels
//! the layers off in reverse.

pub mod cipher;
pub mod error;
pub mod gzip;
pub mod sign;

pub use cipher::{generate_keys, PrivateKey, PublicKey};
pub use error::CodecError;
pub use gzip::GzipCodec;
pub use sign::Signer;
