//! The `auth` profile: the CA that authenticates the server to its clients
//! and the clients to the server.

use chrono::{DateTime, Duration, Utc};
use inkan_ca::{csr_for_key, issue, setup_ca, Identity, SetupConfig, SigningRequest};
use inkan_pki::{spki_sha256, Certificate, DistinguishedName, KeyType, KeyUsages, SubjectAltName};
use inkan_storage::{read_cert, write_file, write_key_file, Profile, ProfileStatus, Storage};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::Result;

/// Name of the distinguished profile backing server and client auth.
pub const AUTH_PROFILE: &str = "auth";

/// Validity of freshly issued server certificates.
const SERVER_CERT_DAYS: i64 = 90;

/// TLS material and the pinned hash of the auth CA.
pub struct AuthMaterial {
    /// The auth CA certificate.
    pub ca_cert: Certificate,
    /// PEM of the server leaf certificate.
    pub server_cert_pem: String,
    /// PEM of the server leaf private key.
    pub server_key_pem: Zeroizing<String>,
    /// Pinned public-key hash of the CA, `sha256//<base64>`.
    pub pubkey_hash: String,
}

impl std::fmt::Debug for AuthMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMaterial")
            .field("ca_subject", &self.ca_cert.subject())
            .field("pubkey_hash", &self.pubkey_hash)
            .field("server_key_pem", &"[REDACTED]")
            .finish()
    }
}

/// Ensures the auth profile exists with a valid CA and a server certificate
/// whose SANs cover `names`.
///
/// A missing CA is provisioned on the spot; an expired one aborts. The server
/// leaf is re-issued when absent, unparseable, expired, or when its SAN set
/// no longer covers the requested names.
///
/// # Errors
///
/// Returns provisioning or issuance failures.
pub fn ensure(
    storage: &Storage,
    names: &[SubjectAltName],
    now: DateTime<Utc>,
) -> Result<AuthMaterial> {
    let profile = storage.ensure_profile(AUTH_PROFILE)?;

    match profile.status(now)? {
        ProfileStatus::NotCa => {
            info!("auth profile has no CA, provisioning one");
            let cfg = SetupConfig {
                subject: DistinguishedName::with_common_name("inkan auth CA"),
                ..SetupConfig::default()
            };
            setup_ca(&profile, &cfg, now)?;
        }
        ProfileStatus::Expired { not_after } => {
            return Err(inkan_ca::Error::ExpiredCa(not_after).into());
        }
        ProfileStatus::ValidCa => {}
    }

    let ca_cert = profile.read_ca_cert()?;
    let pubkey_hash = spki_sha256(&ca_cert)?;

    let (server_cert_pem, server_key_pem) = match usable_server_cert(&profile, names, now) {
        Some(material) => material,
        None => issue_server_cert(&profile, &ca_cert, names, now)?,
    };

    Ok(AuthMaterial {
        ca_cert,
        server_cert_pem,
        server_key_pem,
        pubkey_hash,
    })
}

/// Returns the existing server material if it still fits.
fn usable_server_cert(
    profile: &Profile,
    names: &[SubjectAltName],
    now: DateTime<Utc>,
) -> Option<(String, Zeroizing<String>)> {
    let cert = read_cert(&profile.server_cert_path()).ok()?;
    if cert.is_expired(now) || cert.not_before() > now {
        debug!("server certificate outside its validity window");
        return None;
    }
    if !inkan_pki::covers(cert.san(), names) {
        info!("server certificate SANs no longer cover the listen address");
        return None;
    }
    let key_pem = std::fs::read_to_string(profile.server_key_path()).ok()?;
    rcgen::KeyPair::from_pem(&key_pem).ok()?;
    Some((cert.pem(), Zeroizing::new(key_pem)))
}

fn issue_server_cert(
    profile: &Profile,
    ca_cert: &Certificate,
    names: &[SubjectAltName],
    now: DateTime<Utc>,
) -> Result<(String, Zeroizing<String>)> {
    let common_name = names
        .iter()
        .find_map(|n| match n {
            SubjectAltName::Dns(name) => Some(name.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "inkan server".to_string());
    info!(common_name = %common_name, "issuing server certificate");

    let key_pair = KeyType::EcdsaP256.generate().map_err(inkan_ca::Error::from)?;
    let not_after = std::cmp::min(now + Duration::days(SERVER_CERT_DAYS), ca_cert.not_after());
    let request = SigningRequest {
        subject: DistinguishedName::with_common_name(common_name),
        names: names.to_vec(),
        key_usages: KeyUsages::tls_server(),
        not_before: now - Duration::hours(1),
        not_after,
        csr_pem: csr_for_key(&key_pair)?,
    };
    let identity = Identity::ClientCert {
        common_name: "local".to_string(),
    };
    let issued = issue(profile, &request, &identity, now)?;

    let key_pem = key_pair.serialize_pem();
    write_file(&profile.server_cert_path(), &issued.certificate_pem)?;
    write_key_file(&profile.server_key_path(), &key_pem)?;

    Ok((issued.certificate_pem, Zeroizing::new(key_pem)))
}
