//! The authenticated issuance server.
#![forbid(unsafe_code)]
//!
//! One TCP listener, wrapped in TLS with the `auth`-profile server
//! certificate, hosts two protocols: HTTP/2 requests with an
//! `application/grpc` content type are dispatched to the RPC services, and
//! everything else to the HTTP router (`/healthz`, `/metrics`, optionally
//! `/issue`).
//!
//! Client certificates are requested but never required at the handshake;
//! the [`auth::Authenticator`] derives a per-request identity from the peer
//! chain or the bootstrap bearer token, and the issuance engine makes the
//! authorization decision.

pub mod auth;
pub mod authprofile;
pub mod config;
pub mod error;
mod http;
pub mod metrics;
mod mux;
mod server;
mod services;
mod tls;

pub use auth::{AuthError, Authenticator};
pub use authprofile::{ensure as ensure_auth_profile, AuthMaterial, AUTH_PROFILE};
pub use config::ServeConfig;
pub use error::{Result, ServerError};
pub use server::{CloseHandle, Server};
