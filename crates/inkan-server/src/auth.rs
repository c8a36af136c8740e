//! Per-request identity derivation.

use chrono::{DateTime, Utc};
use inkan_ca::Identity;
use inkan_pki::{validate_against_ca, Certificate, ExtKeyUsage};
use rustls_pki_types::CertificateDer;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

/// Scheme prefix of the bootstrap bearer token, matched case-insensitively.
pub const BEARER_PREFIX: &str = "bearer ";

/// Authentication failure; the reasons are deliberately terse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// A peer certificate was presented but did not verify.
    #[error("failed to verify client cert: {0}")]
    VerifyFailed(String),
    /// The authorization header did not carry a bearer scheme.
    #[error("bad scheme")]
    BadScheme,
    /// The bearer token did not match the bootstrap secret.
    #[error("bad token")]
    BadToken,
}

/// Derives an [`Identity`] from TLS peer certificates and the request's
/// authorization header.
#[derive(Debug)]
pub struct Authenticator {
    ca_cert: Certificate,
    bootstrap_token: Option<String>,
}

impl Authenticator {
    /// Creates an authenticator verifying peers against the given CA.
    #[must_use]
    pub fn new(ca_cert: Certificate, bootstrap_token: Option<String>) -> Self {
        Self {
            ca_cert,
            bootstrap_token,
        }
    }

    /// Walks the authentication ladder.
    ///
    /// 1. A presented peer certificate must verify against the auth CA with
    ///    extended key usage clientAuth; the header is then ignored.
    /// 2. Otherwise an authorization header must carry `bearer <token>` with
    ///    the configured non-empty bootstrap secret.
    /// 3. With neither, the request is anonymous.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] when presented credentials are invalid.
    pub fn authenticate(
        &self,
        peer_certs: &[CertificateDer<'static>],
        authorization: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Identity, AuthError> {
        if let Some(peer) = peer_certs.first() {
            let cert = Certificate::from_der(peer.as_ref())
                .map_err(|e| AuthError::VerifyFailed(e.to_string()))?;
            validate_against_ca(&cert, &self.ca_cert, now, Some(ExtKeyUsage::ClientAuth))
                .map_err(|e| AuthError::VerifyFailed(e.to_string()))?;
            debug!(common_name = %cert.subject(), "authenticated via client certificate");
            return Ok(Identity::ClientCert {
                common_name: cert.subject().to_string(),
            });
        }

        if let Some(header) = authorization {
            let prefix_len = BEARER_PREFIX.len();
            if header.len() < prefix_len
                || !header.is_char_boundary(prefix_len)
                || !header[..prefix_len].eq_ignore_ascii_case(BEARER_PREFIX)
            {
                return Err(AuthError::BadScheme);
            }
            let token = &header[prefix_len..];
            let Some(expected) = self.bootstrap_token.as_deref().filter(|t| !t.is_empty())
            else {
                return Err(AuthError::BadToken);
            };
            if token.len() != expected.len()
                || !bool::from(token.as_bytes().ct_eq(expected.as_bytes()))
            {
                return Err(AuthError::BadToken);
            }
            debug!("authenticated via bootstrap token");
            return Ok(Identity::BootstrapToken);
        }

        Ok(Identity::Anonymous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use inkan_ca::{csr_for_key, issue, setup_ca, SetupConfig, SigningRequest};
    use inkan_pki::{DistinguishedName, KeyType, KeyUsages};
    use inkan_storage::Storage;

    struct Fixture {
        _dir: tempfile::TempDir,
        authenticator: Authenticator,
        client_cert: Certificate,
        server_cert: Certificate,
        other_leaf: Certificate,
    }

    fn fixture(now: DateTime<Utc>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path());

        let issue_leaf = |profile_name: &str, usages: KeyUsages| {
            let profile = storage.ensure_profile(profile_name).unwrap();
            setup_ca(
                &profile,
                &SetupConfig {
                    subject: DistinguishedName::with_common_name(&format!("{profile_name} CA")),
                    ..SetupConfig::default()
                },
                now,
            )
            .unwrap();
            let key = KeyType::EcdsaP256.generate().unwrap();
            let req = SigningRequest {
                subject: DistinguishedName::with_common_name("node-1"),
                names: Vec::new(),
                key_usages: usages,
                not_before: now,
                not_after: now + Duration::days(30),
                csr_pem: csr_for_key(&key).unwrap(),
            };
            let identity = inkan_ca::Identity::ClientCert {
                common_name: "local".into(),
            };
            let issued = issue(&profile, &req, &identity, now).unwrap();
            (
                profile.read_ca_cert().unwrap(),
                Certificate::from_pem(&issued.certificate_pem).unwrap(),
            )
        };

        let (auth_ca, client_cert) = issue_leaf("auth", KeyUsages::tls_client());
        let server_cert = {
            let profile = storage.profile("auth").unwrap();
            let key = KeyType::EcdsaP256.generate().unwrap();
            let req = SigningRequest {
                subject: DistinguishedName::with_common_name("web"),
                names: Vec::new(),
                key_usages: KeyUsages::tls_server(),
                not_before: now,
                not_after: now + Duration::days(30),
                csr_pem: csr_for_key(&key).unwrap(),
            };
            let identity = inkan_ca::Identity::ClientCert {
                common_name: "local".into(),
            };
            let issued = issue(&profile, &req, &identity, now).unwrap();
            Certificate::from_pem(&issued.certificate_pem).unwrap()
        };
        let (_, other_leaf) = issue_leaf("other", KeyUsages::tls_client());

        Fixture {
            _dir: dir,
            authenticator: Authenticator::new(auth_ca, Some("secret-token".into())),
            client_cert,
            server_cert,
            other_leaf,
        }
    }

    fn der_of(cert: &Certificate) -> Vec<CertificateDer<'static>> {
        vec![CertificateDer::from(cert.der().to_vec())]
    }

    #[test]
    fn no_credentials_is_anonymous() {
        let fx = fixture(Utc::now());
        let id = fx.authenticator.authenticate(&[], None, Utc::now()).unwrap();
        assert_eq!(id, Identity::Anonymous);
    }

    #[test]
    fn valid_client_cert_yields_its_common_name() {
        let now = Utc::now();
        let fx = fixture(now);
        let id = fx
            .authenticator
            .authenticate(&der_of(&fx.client_cert), None, now)
            .unwrap();
        assert_eq!(
            id,
            Identity::ClientCert {
                common_name: "node-1".into()
            }
        );
    }

    #[test]
    fn client_cert_wins_over_authorization_header() {
        let now = Utc::now();
        let fx = fixture(now);
        let id = fx
            .authenticator
            .authenticate(&der_of(&fx.client_cert), Some("bearer wrong"), now)
            .unwrap();
        assert!(matches!(id, Identity::ClientCert { .. }));
    }

    #[test]
    fn cert_from_another_ca_fails_verification() {
        let now = Utc::now();
        let fx = fixture(now);
        let err = fx
            .authenticator
            .authenticate(&der_of(&fx.other_leaf), None, now)
            .unwrap_err();
        assert!(matches!(err, AuthError::VerifyFailed(_)));
    }

    #[test]
    fn server_auth_cert_is_rejected_for_client_auth() {
        let now = Utc::now();
        let fx = fixture(now);
        let err = fx
            .authenticator
            .authenticate(&der_of(&fx.server_cert), None, now)
            .unwrap_err();
        assert!(matches!(err, AuthError::VerifyFailed(_)));
    }

    #[test]
    fn bearer_token_matches() {
        let fx = fixture(Utc::now());
        let id = fx
            .authenticator
            .authenticate(&[], Some("bearer secret-token"), Utc::now())
            .unwrap();
        assert_eq!(id, Identity::BootstrapToken);
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let fx = fixture(Utc::now());
        let id = fx
            .authenticator
            .authenticate(&[], Some("Bearer secret-token"), Utc::now())
            .unwrap();
        assert_eq!(id, Identity::BootstrapToken);
    }

    #[test]
    fn wrong_token_is_rejected() {
        let fx = fixture(Utc::now());
        let err = fx
            .authenticator
            .authenticate(&[], Some("bearer nope"), Utc::now())
            .unwrap_err();
        assert_eq!(err, AuthError::BadToken);
    }

    #[test]
    fn non_bearer_scheme_is_rejected() {
        let fx = fixture(Utc::now());
        let err = fx
            .authenticator
            .authenticate(&[], Some("basic dXNlcjpwdw=="), Utc::now())
            .unwrap_err();
        assert_eq!(err, AuthError::BadScheme);
    }

    #[test]
    fn empty_configured_token_never_matches() {
        let now = Utc::now();
        let fx = fixture(now);
        let authenticator = Authenticator::new(
            // Reuse the CA but disable bootstrap.
            fx.authenticator.ca_cert.clone(),
            Some(String::new()),
        );
        let err = authenticator
            .authenticate(&[], Some("bearer "), now)
            .unwrap_err();
        assert_eq!(err, AuthError::BadToken);
    }
}
