//! CA provisioning.

use chrono::{DateTime, Duration, Utc};
use inkan_pki::{rcgen_time, DistinguishedName, KeyType, KeyUsages};
use inkan_storage::{IssueDb, Profile, ProfileStatus};
use rcgen::{BasicConstraints, CertificateParams, IsCa};
use tracing::info;

use crate::error::{Error, Result};

/// Configuration for setting up a profile's CA.
#[derive(Debug, Clone)]
pub struct SetupConfig {
    /// Subject of the CA certificate.
    pub subject: DistinguishedName,
    /// Key type to generate.
    pub key_type: KeyType,
    /// CA certificate validity in days.
    pub validity_days: i64,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            subject: DistinguishedName::default(),
            key_type: KeyType::default(),
            validity_days: 3650,
        }
    }
}

/// Provisions a CA for the profile: generates a key pair, self-signs a CA
/// certificate, writes both to the profile (key owner-only) and creates an
/// empty issue journal.
///
/// A profile that already has a valid CA is left untouched. The self-issued
/// CA certificate itself is not recorded in the journal.
///
/// # Errors
///
/// Returns [`Error::ExpiredCa`] for profiles whose CA has expired, and
/// generation or I/O failures otherwise.
pub fn setup_ca(profile: &Profile, cfg: &SetupConfig, now: DateTime<Utc>) -> Result<()> {
    match profile.status(now)? {
        ProfileStatus::ValidCa => {
            info!(profile = %profile, "profile already has a CA set up");
            return Ok(());
        }
        ProfileStatus::Expired { not_after } => return Err(Error::ExpiredCa(not_after)),
        ProfileStatus::NotCa => {}
    }

    if cfg.subject.common_name.is_empty() {
        return Err(Error::PolicyViolation(
            "CA subject common name must not be empty".to_string(),
        ));
    }

    info!(profile = %profile, subject = %cfg.subject, key_type = %cfg.key_type, "setting up CA");

    let key_pair = cfg.key_type.generate()?;

    let mut params = CertificateParams::default();
    params.distinguished_name = cfg.subject.to_rcgen();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = KeyUsages::ca().rcgen_key_usages();
    // Backdate an hour to tolerate clock skew between peers.
    params.not_before = rcgen_time(now - Duration::hours(1))?;
    params.not_after = rcgen_time(now + Duration::days(cfg.validity_days))?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| inkan_pki::Error::Generation(format!("failed to self-sign CA: {e}")))?;

    profile.write_ca_cert(&cert.pem())?;
    profile.write_ca_key(&key_pair.serialize_pem())?;
    IssueDb::create(profile.issue_db_path())?;

    info!(profile = %profile, "CA setup complete");
    Ok(())
}
