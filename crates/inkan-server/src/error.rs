//! Server error types and status mapping.

use std::net::SocketAddr;

use thiserror::Error;
use tonic::Status;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server error variants.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("failed to bind {0}: {1}")]
    Bind(SocketAddr, #[source] std::io::Error),

    /// TLS configuration could not be built.
    #[error("tls setup failed: {0}")]
    Tls(String),

    /// Engine failure during provisioning or issuance.
    #[error(transparent)]
    Ca(#[from] inkan_ca::Error),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] inkan_storage::Error),

    /// Value-layer failure.
    #[error(transparent)]
    Pki(#[from] inkan_pki::Error),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Operator-supplied shutdown cause.
    #[error("shutdown: {0}")]
    Shutdown(String),
}

/// Maps an engine error to its transport status code.
pub(crate) fn status_from_ca_error(err: &inkan_ca::Error) -> Status {
    use inkan_ca::Error as Ca;
    use inkan_storage::Error as Store;

    match err {
        Ca::Unauthorized(_) => Status::permission_denied(err.to_string()),
        Ca::ExpiredCa(_) | Ca::NotCa => Status::failed_precondition(err.to_string()),
        Ca::PolicyViolation(_) => Status::invalid_argument(err.to_string()),
        Ca::Pki(e) => match e {
            inkan_pki::Error::InvalidKeyUsage(_)
            | inkan_pki::Error::San(_)
            | inkan_pki::Error::UnsupportedKey(_) => Status::invalid_argument(e.to_string()),
            _ => Status::internal(e.to_string()),
        },
        Ca::Storage(e) => match e {
            Store::ProfileNotFound(_) | Store::SerialNotFound(_) => {
                Status::not_found(e.to_string())
            }
            _ => Status::internal(e.to_string()),
        },
        Ca::SerialExhausted(_) => Status::internal(err.to_string()),
    }
}
