//! CA lifecycle for inkan: provisioning and issuance.
#![forbid(unsafe_code)]
//!
//! - [`setup`] - one-time CA provisioning for a profile
//! - [`issue`] - the issuance pipeline: gate, authorize, validate, reserve,
//!   sign, commit
//! - [`identity`] - the authenticated principal the pipeline authorizes
//! - [`request`] - signing requests and policy validation
//!
//! The engine holds no state of its own; profiles own their material and the
//! journal records every allocation.

pub mod error;
pub mod identity;
pub mod issue;
pub mod request;
pub mod setup;

pub use error::{Error, Result};
pub use identity::Identity;
pub use issue::{authorize, issue, Issued, SERIAL_RETRY_LIMIT};
pub use request::{csr_for_key, SigningRequest};
pub use setup::{setup_ca, SetupConfig};
