//! The issuance pipeline.

use chrono::{DateTime, Utc};
use inkan_pki::{rcgen_time, to_rcgen_sans, BaseKeyUsage, Certificate, ExtKeyUsage};
use inkan_storage::{Profile, ProfileStatus};
use rand::Rng;
use rcgen::{CertificateParams, CertificateSigningRequestParams, IsCa, KeyPair};
use rustls_pki_types::CertificateDer;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::request::SigningRequest;

/// How many serial collisions are retried before giving up.
pub const SERIAL_RETRY_LIMIT: u32 = 8;

/// The outcome of a successful issuance.
#[derive(Debug, Clone)]
pub struct Issued {
    /// PEM-encoded leaf certificate.
    pub certificate_pem: String,
    /// PEM-encoded chain (the CA certificate).
    pub chain_pem: String,
    /// The allocated serial.
    pub serial: u64,
}

/// Issues one certificate under the profile's CA.
///
/// The pipeline gates on the profile status, authorizes the identity,
/// validates the request, reserves a fresh serial in the journal, signs, and
/// commits the result. A failure after the reservation leaves the serial
/// visible as in-progress; no compensating deletion is attempted.
///
/// # Errors
///
/// Returns the first pipeline failure; see [`Error`] for the taxonomy.
pub fn issue(
    profile: &Profile,
    request: &SigningRequest,
    identity: &Identity,
    now: DateTime<Utc>,
) -> Result<Issued> {
    match profile.status(now)? {
        ProfileStatus::ValidCa => {}
        ProfileStatus::NotCa => return Err(Error::NotCa),
        ProfileStatus::Expired { not_after } => return Err(Error::ExpiredCa(not_after)),
    }

    authorize(identity, request)?;

    let ca_cert = profile.read_ca_cert()?;
    request.validate(&ca_cert)?;

    let db = inkan_storage::IssueDb::open(profile.issue_db_path());
    let serial = allocate_serial(&db, now)?;

    debug!(profile = %profile, serial, "building certificate");
    let leaf_pem = match sign(&ca_cert, profile, request, serial) {
        Ok(pem) => pem,
        Err(e) => {
            // The reservation stays behind on purpose so the operator can see
            // the incomplete issuance in listings.
            warn!(profile = %profile, serial, error = %e, "issuance failed after reservation");
            return Err(e);
        }
    };

    db.commit(serial, &leaf_pem, now)?;
    info!(
        profile = %profile,
        serial,
        subject = %request.subject.common_name,
        auth_sub = %identity,
        "issued certificate"
    );

    Ok(Issued {
        certificate_pem: leaf_pem,
        chain_pem: ca_cert.pem(),
        serial,
    })
}

/// Checks whether the identity may make this request.
///
/// # Errors
///
/// Returns [`Error::Unauthorized`] when it may not.
pub fn authorize(identity: &Identity, request: &SigningRequest) -> Result<()> {
    match identity {
        Identity::Anonymous => Err(Error::Unauthorized(
            "anonymous issuance is not permitted".to_string(),
        )),
        Identity::BootstrapToken => {
            // A bootstrap token buys exactly one shape: a client-auth leaf
            // bound to a caller-supplied common name.
            if request.key_usages.ext_key_usage != vec![ExtKeyUsage::ClientAuth] {
                return Err(Error::Unauthorized(
                    "bootstrap token may only request a clientAuth certificate".to_string(),
                ));
            }
            if request.key_usages.has_base(BaseKeyUsage::CertSign)
                || request.key_usages.has_base(BaseKeyUsage::CrlSign)
            {
                return Err(Error::Unauthorized(
                    "bootstrap token may not request certificate-signing usage".to_string(),
                ));
            }
            if request.subject.common_name.is_empty() {
                return Err(Error::Unauthorized(
                    "bootstrap enrollment requires a common name".to_string(),
                ));
            }
            Ok(())
        }
        Identity::ClientCert { .. } => Ok(()),
    }
}

/// Draws 63-bit random serials until one reserves cleanly.
fn allocate_serial(db: &inkan_storage::IssueDb, now: DateTime<Utc>) -> Result<u64> {
    let mut rng = rand::thread_rng();
    for attempt in 0..SERIAL_RETRY_LIMIT {
        let serial = loop {
            let candidate = rng.gen::<u64>() >> 1;
            if candidate != 0 {
                break candidate;
            }
        };
        match db.reserve(serial, now) {
            Ok(()) => return Ok(serial),
            Err(inkan_storage::Error::AlreadyExists(_)) => {
                debug!(serial, attempt, "serial collision, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::SerialExhausted(SERIAL_RETRY_LIMIT))
}

/// Builds and signs the certificate for an already-reserved serial.
fn sign(
    ca_cert: &Certificate,
    profile: &Profile,
    request: &SigningRequest,
    serial: u64,
) -> Result<String> {
    let mut params = CertificateParams::default();
    params.distinguished_name = request.subject.to_rcgen();
    params.is_ca = IsCa::NoCa;
    params.key_usages = request.key_usages.rcgen_key_usages();
    params.extended_key_usages = request.key_usages.rcgen_ext_key_usages();
    params.not_before = rcgen_time(request.not_before)?;
    params.not_after = rcgen_time(request.not_after)?;
    params.serial_number = Some(serial.into());
    params.subject_alt_names = to_rcgen_sans(&request.names)?;
    params.use_authority_key_identifier_extension = true;

    // Rebuild the issuer from the stored CA certificate so issuer fields and
    // key identifiers always match the on-disk CA. The signature algorithm
    // follows the CA key type.
    let ca_key_pem = profile.read_ca_key_pem()?;
    let ca_key = KeyPair::from_pem(&ca_key_pem)
        .map_err(|e| inkan_pki::Error::Parse(format!("unparseable CA key: {e}")))?;
    let ca_der = CertificateDer::from(ca_cert.der().to_vec());
    let issuer_params = CertificateParams::from_ca_cert_der(&ca_der)
        .map_err(|e| inkan_pki::Error::Parse(format!("unusable CA certificate: {e}")))?;
    let issuer = issuer_params
        .self_signed(&ca_key)
        .map_err(|e| inkan_pki::Error::Generation(format!("failed to rebuild issuer: {e}")))?;

    let mut csr = CertificateSigningRequestParams::from_pem(&request.csr_pem)
        .map_err(|e| Error::PolicyViolation(format!("unparseable certification request: {e}")))?;
    csr.params = params;
    let cert = csr
        .signed_by(&issuer, &ca_key)
        .map_err(|e| inkan_pki::Error::Generation(format!("failed to sign certificate: {e}")))?;

    Ok(cert.pem())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::csr_for_key;
    use crate::setup::{setup_ca, SetupConfig};
    use chrono::Duration;
    use inkan_pki::{
        validate_against_ca, DistinguishedName, KeyType, KeyUsages, SubjectAltName,
    };
    use inkan_storage::{IssueState, Storage};

    fn ca_profile(storage: &Storage, now: DateTime<Utc>) -> Profile {
        let profile = storage.ensure_profile("ca1").unwrap();
        let cfg = SetupConfig {
            subject: DistinguishedName::with_common_name("Test CA"),
            key_type: KeyType::EcdsaP256,
            validity_days: 365,
        };
        setup_ca(&profile, &cfg, now).unwrap();
        profile
    }

    fn client_request(cn: &str, now: DateTime<Utc>) -> SigningRequest {
        let key_pair = KeyType::EcdsaP256.generate().unwrap();
        SigningRequest {
            subject: DistinguishedName::with_common_name(cn),
            names: vec![SubjectAltName::Dns(format!("{cn}.example"))],
            key_usages: KeyUsages::tls_client(),
            not_before: now,
            not_after: now + Duration::days(30),
            csr_pem: csr_for_key(&key_pair).unwrap(),
        }
    }

    fn operator() -> Identity {
        Identity::ClientCert {
            common_name: "local".into(),
        }
    }

    #[test]
    fn issue_commits_an_active_entry() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let now = Utc::now();
        let profile = ca_profile(&storage, now);

        let issued = issue(&profile, &client_request("alice", now), &operator(), now).unwrap();
        assert!(issued.serial > 0);

        let db = inkan_storage::IssueDb::open(profile.issue_db_path());
        let entry = db.entry_by_serial(issued.serial).unwrap();
        assert_eq!(entry.state, IssueState::ActiveCertificate);
        assert_eq!(entry.pem, issued.certificate_pem);
    }

    #[test]
    fn issued_leaf_verifies_against_ca_with_client_auth() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let now = Utc::now();
        let profile = ca_profile(&storage, now);

        let issued = issue(&profile, &client_request("alice", now), &operator(), now).unwrap();
        let leaf = Certificate::from_pem(&issued.certificate_pem).unwrap();
        let ca = Certificate::from_pem(&issued.chain_pem).unwrap();
        validate_against_ca(&leaf, &ca, now, Some(ExtKeyUsage::ClientAuth)).unwrap();
        assert_eq!(leaf.subject(), "alice");
        assert_eq!(leaf.serial(), issued.serial);
        assert_eq!(
            leaf.san(),
            &[SubjectAltName::Dns("alice.example".into())]
        );
    }

    #[test]
    fn serials_are_distinct_across_issuances() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let now = Utc::now();
        let profile = ca_profile(&storage, now);

        let mut serials = std::collections::HashSet::new();
        for i in 0..5 {
            let issued = issue(
                &profile,
                &client_request(&format!("node-{i}"), now),
                &operator(),
                now,
            )
            .unwrap();
            assert!(serials.insert(issued.serial));
        }
    }

    #[test]
    fn anonymous_identity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let now = Utc::now();
        let profile = ca_profile(&storage, now);

        let err = issue(
            &profile,
            &client_request("alice", now),
            &Identity::Anonymous,
            now,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn bootstrap_token_may_only_request_client_auth() {
        let now = Utc::now();
        let mut req = client_request("node-1", now);
        authorize(&Identity::BootstrapToken, &req).unwrap();

        req.key_usages = KeyUsages::tls_server();
        assert!(matches!(
            authorize(&Identity::BootstrapToken, &req),
            Err(Error::Unauthorized(_))
        ));

        req.key_usages = KeyUsages::tls_client_server();
        assert!(matches!(
            authorize(&Identity::BootstrapToken, &req),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn bootstrap_token_may_not_request_cert_sign() {
        let now = Utc::now();
        let mut req = client_request("node-1", now);
        req.key_usages.key_usage.push(BaseKeyUsage::CertSign);
        assert!(matches!(
            authorize(&Identity::BootstrapToken, &req),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn issuance_against_empty_profile_is_gated() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let now = Utc::now();
        let profile = storage.ensure_profile("empty").unwrap();

        let err = issue(&profile, &client_request("alice", now), &operator(), now).unwrap_err();
        assert!(matches!(err, Error::NotCa));
    }

    #[test]
    fn expired_ca_refuses_issuance() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let now = Utc::now();
        let profile = ca_profile(&storage, now);

        let later = now + Duration::days(366);
        let err = issue(
            &profile,
            &client_request("alice", later),
            &operator(),
            later,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ExpiredCa(_)));
    }

    #[test]
    fn stuck_reservation_stays_visible_and_does_not_block_issuance() {
        // Simulates a crash between reserve and commit: the stuck serial
        // folds to IssueInProgress and later issuances pick fresh serials.
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());
        let now = Utc::now();
        let profile = ca_profile(&storage, now);

        let db = inkan_storage::IssueDb::open(profile.issue_db_path());
        db.reserve(424_242, now).unwrap();

        let issued = issue(&profile, &client_request("alice", now), &operator(), now).unwrap();
        assert_ne!(issued.serial, 424_242);

        let entries = db.entries().unwrap();
        let stuck = entries.iter().find(|e| e.serial == 424_242).unwrap();
        assert_eq!(stuck.state, IssueState::IssueInProgress);
        let fresh = entries.iter().find(|e| e.serial == issued.serial).unwrap();
        assert_eq!(fresh.state, IssueState::ActiveCertificate);
    }
}
