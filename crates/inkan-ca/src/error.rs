//! Issuance engine error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// The request violates issuance policy.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// The profile has no CA material.
    #[error("profile has no CA set up")]
    NotCa,

    /// The profile's CA certificate has expired.
    #[error("CA certificate expired at {0}")]
    ExpiredCa(DateTime<Utc>),

    /// The identity is not permitted to make this request.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// No unique serial could be allocated within the retry budget.
    #[error("could not allocate a unique serial after {0} attempts")]
    SerialExhausted(u32),

    /// Value-layer failure.
    #[error(transparent)]
    Pki(#[from] inkan_pki::Error),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] inkan_storage::Error),
}
