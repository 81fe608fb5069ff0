//! Codec error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from key handling and encryption.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Key file could not be read
    #[error("read key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// PEM/PKCS#1 parsing failed
    #[error("parse key: {0}")]
    KeyParse(#[from] rsa::pkcs1::Error),

    /// Key generation failed
    #[error("generate key: {0}")]
    KeyGen(rsa::Error),

    /// RSA encryption failed
    #[error("encrypt payload: {0}")]
    Encrypt(rsa::Error),

    /// RSA decryption failed (wrong key or corrupted ciphertext)
    #[error("decrypt payload: {0}")]
    Decrypt(rsa::Error),

    /// Ciphertext is not a whole number of RSA blocks
    #[error("ciphertext length {0} is not a multiple of the key size")]
    BlockLength(usize),
}
