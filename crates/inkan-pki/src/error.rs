//! PKI error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for PKI operations.
pub type Result<T> = std::result::Result<T, Error>;

/// PKI error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Certificate or key generation failed.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Parsing of certificate material failed.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Key usage specification is invalid.
    #[error("invalid key usage: {0}")]
    InvalidKeyUsage(String),

    /// Subject Alternative Name entry is invalid.
    #[error("invalid subject alternative name: {0}")]
    San(String),

    /// The presented public key is of an unsupported type or too weak.
    #[error("unsupported public key: {0}")]
    UnsupportedKey(String),

    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    /// Certificate has expired.
    #[error("certificate expired at {0}")]
    Expired(DateTime<Utc>),

    /// Certificate is not yet valid.
    #[error("certificate not valid before {0}")]
    NotYetValid(DateTime<Utc>),

    /// Certificate validation failed.
    #[error("certificate validation failed: {0}")]
    Validation(String),
}
