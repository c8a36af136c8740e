//! On-disk state for inkan.
#![forbid(unsafe_code)]
//!
//! Two layers live here:
//!
//! - [`profile`] - named profile directories owning CA material, with strict
//!   permissions on private keys and a status classification gate
//! - [`issuedb`] - the append-only journal of per-serial issuance records
//!
//! One profile owns exactly one CA identity and one journal; directories are
//! assumed single-process.

pub mod error;
pub mod issuedb;
pub mod profile;

pub use error::{Error, Result};
pub use issuedb::{IssueDb, IssueEntry, IssueState};
pub use profile::{read_cert, write_file, write_key_file, Profile, ProfileStatus, Storage};
