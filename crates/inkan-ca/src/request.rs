//! Signing requests and their policy validation.

use chrono::{DateTime, Utc};
use inkan_pki::{check_public_key, Certificate, DistinguishedName, KeyUsages, SubjectAltName};
use x509_parser::prelude::FromDer;

use crate::error::{Error, Result};

/// A validated request for one certificate.
///
/// The embedded public key travels as a PKCS#10 request so the caller proves
/// possession of the private key; every other field of that envelope is
/// ignored and the subject, names, usages and validity below are what the
/// issued certificate carries.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    /// Subject distinguished name.
    pub subject: DistinguishedName,
    /// Subject alternative names.
    pub names: Vec<SubjectAltName>,
    /// Requested key usages.
    pub key_usages: KeyUsages,
    /// Validity start.
    pub not_before: DateTime<Utc>,
    /// Validity end.
    pub not_after: DateTime<Utc>,
    /// PEM-encoded PKCS#10 request carrying the subject public key.
    pub csr_pem: String,
}

impl SigningRequest {
    /// Validates the request against issuance policy and the signing CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyViolation`] (or a value-layer error) when the
    /// subject, validity period, key usages or embedded public key are
    /// unacceptable.
    pub fn validate(&self, ca_cert: &Certificate) -> Result<()> {
        if self.subject.common_name.is_empty() {
            return Err(Error::PolicyViolation(
                "subject common name must not be empty".to_string(),
            ));
        }
        if self.not_before >= self.not_after {
            return Err(Error::PolicyViolation(
                "validity period is empty".to_string(),
            ));
        }
        if self.not_after > ca_cert.not_after() {
            return Err(Error::PolicyViolation(format!(
                "requested notAfter {} exceeds CA notAfter {}",
                self.not_after,
                ca_cert.not_after()
            )));
        }
        self.key_usages.validate()?;
        if self.key_usages.is_empty() {
            return Err(Error::PolicyViolation(
                "at least one key usage is required".to_string(),
            ));
        }
        self.check_embedded_key()?;
        Ok(())
    }

    /// Verifies the proof-of-possession signature and the acceptance policy
    /// of the embedded public key.
    fn check_embedded_key(&self) -> Result<()> {
        let der = inkan_pki::pem::decode(inkan_pki::pem::CERTIFICATE_REQUEST, &self.csr_pem)?;
        let (_, csr) =
            x509_parser::certification_request::X509CertificationRequest::from_der(&der).map_err(
                |e| Error::PolicyViolation(format!("unparseable certification request: {e}")),
            )?;
        csr.verify_signature().map_err(|e| {
            Error::PolicyViolation(format!(
                "certification request signature does not verify: {e}"
            ))
        })?;
        check_public_key(&csr.certification_request_info.subject_pki)?;
        Ok(())
    }
}

/// Builds a PKCS#10 envelope for a locally generated key pair.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn csr_for_key(key_pair: &rcgen::KeyPair) -> Result<String> {
    let params = rcgen::CertificateParams::default();
    let csr = params
        .serialize_request(key_pair)
        .map_err(|e| inkan_pki::Error::Generation(format!("failed to build CSR: {e}")))?;
    let pem = csr
        .pem()
        .map_err(|e| inkan_pki::Error::Generation(format!("failed to encode CSR: {e}")))?;
    Ok(pem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use inkan_pki::{rcgen_time, KeyType};
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa};

    fn test_ca(now: DateTime<Utc>) -> Certificate {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, "Test CA");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.not_before = rcgen_time(now - Duration::hours(1)).unwrap();
        params.not_after = rcgen_time(now + Duration::days(365)).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        Certificate::from_der(cert.der()).unwrap()
    }

    fn valid_request(now: DateTime<Utc>) -> SigningRequest {
        let key_pair = KeyType::EcdsaP256.generate().unwrap();
        SigningRequest {
            subject: DistinguishedName::with_common_name("alice"),
            names: vec![SubjectAltName::Dns("alice.example".into())],
            key_usages: KeyUsages::tls_client(),
            not_before: now,
            not_after: now + Duration::days(30),
            csr_pem: csr_for_key(&key_pair).unwrap(),
        }
    }

    #[test]
    fn valid_request_passes() {
        let now = Utc::now();
        valid_request(now).validate(&test_ca(now)).unwrap();
    }

    #[test]
    fn empty_common_name_is_rejected() {
        let now = Utc::now();
        let mut req = valid_request(now);
        req.subject.common_name.clear();
        let err = req.validate(&test_ca(now)).unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[test]
    fn empty_validity_is_rejected() {
        let now = Utc::now();
        let mut req = valid_request(now);
        req.not_after = req.not_before;
        let err = req.validate(&test_ca(now)).unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[test]
    fn validity_beyond_ca_is_rejected() {
        let now = Utc::now();
        let mut req = valid_request(now);
        req.not_after = now + Duration::days(400);
        let err = req.validate(&test_ca(now)).unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[test]
    fn empty_key_usages_are_rejected() {
        let now = Utc::now();
        let mut req = valid_request(now);
        req.key_usages = KeyUsages::default();
        let err = req.validate(&test_ca(now)).unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[test]
    fn garbage_csr_is_rejected() {
        let now = Utc::now();
        let mut req = valid_request(now);
        req.csr_pem = "not a csr".to_string();
        assert!(req.validate(&test_ca(now)).is_err());
    }

    #[test]
    fn rsa_csr_is_accepted() {
        let now = Utc::now();
        let key_pair = KeyType::Rsa2048.generate().unwrap();
        let mut req = valid_request(now);
        req.csr_pem = csr_for_key(&key_pair).unwrap();
        req.validate(&test_ca(now)).unwrap();
    }
}
