//! X.509 value layer for inkan.
#![forbid(unsafe_code)]
//!
//! This crate holds the pure certificate vocabulary the rest of the system
//! builds on:
//!
//! - [`keyusage`] - key-usage catalog: presets, explicit usage lists and
//!   their mutual-exclusion rules
//! - [`subject`] - subject distinguished names
//! - [`san`] - subject alternative names and host-SAN derivation
//! - [`keys`] - key types, key generation and the public-key acceptance
//!   policy
//! - [`cert`] - certificate wrapper, chain validation, SPKI pin hash
//! - [`pem`] - PEM framing
//! - [`error`] - error types
//!
//! Nothing here touches the filesystem or the network; "now" is always an
//! explicit argument so callers control the clock.

pub mod cert;
pub mod error;
pub mod keys;
pub mod keyusage;
pub mod pem;
pub mod san;
pub mod subject;

pub use cert::{rcgen_time, spki_sha256, validate_against_ca, verify_signature, Certificate};
pub use error::{Error, Result};
pub use keys::{check_public_key, KeyType, MIN_RSA_BITS};
pub use keyusage::{BaseKeyUsage, ExtKeyUsage, KeyUsages};
pub use san::{covers, names_for_host, to_rcgen_sans, SubjectAltName};
pub use subject::DistinguishedName;
