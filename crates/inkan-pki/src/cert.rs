//! Certificate wrapper and chain validation.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;
use x509_parser::prelude::*;

use crate::error::{Error, Result};
use crate::keyusage::ExtKeyUsage;
use crate::pem;
use crate::san::SubjectAltName;

/// A DER-encoded X.509 certificate with parsed metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// DER-encoded certificate bytes.
    der: Vec<u8>,
    /// Serial number, folded to 64 bits.
    serial: u64,
    /// Certificate validity start time.
    not_before: DateTime<Utc>,
    /// Certificate validity end time.
    not_after: DateTime<Utc>,
    /// Subject common name.
    subject: String,
    /// Issuer common name.
    issuer: String,
    /// Subject alternative names.
    san: Vec<SubjectAltName>,
    /// Whether the basic-constraints extension marks this as a CA.
    is_ca: bool,
}

impl Certificate {
    /// Parses a certificate from DER-encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Parse(format!("failed to parse certificate: {e}")))?;

        let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
            .ok_or_else(|| Error::Parse("invalid not_before timestamp".into()))?;
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| Error::Parse("invalid not_after timestamp".into()))?;

        let subject = extract_common_name(cert.subject())?;
        let issuer = extract_common_name(cert.issuer())?;
        let san = extract_san(&cert);
        let serial = fold_serial(cert.raw_serial());
        let is_ca = cert
            .basic_constraints()
            .ok()
            .flatten()
            .map_or(false, |bc| bc.value.ca);

        Ok(Self {
            der: der.to_vec(),
            serial,
            not_before,
            not_after,
            subject,
            issuer,
            san,
            is_ca,
        })
    }

    /// Parses a certificate from a PEM block.
    ///
    /// # Errors
    ///
    /// Returns an error if no certificate block is present or parsing fails.
    pub fn from_pem(pem_str: &str) -> Result<Self> {
        let der = pem::decode(pem::CERTIFICATE, pem_str)?;
        Self::from_der(&der)
    }

    /// Returns the DER-encoded certificate bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded certificate.
    #[must_use]
    pub fn pem(&self) -> String {
        pem::encode(pem::CERTIFICATE, &self.der)
    }

    /// Returns the serial number folded to 64 bits.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }

    /// Returns the certificate validity start time.
    #[must_use]
    pub const fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// Returns the certificate validity end time.
    #[must_use]
    pub const fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Returns the subject common name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the issuer common name.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the subject alternative names.
    #[must_use]
    pub fn san(&self) -> &[SubjectAltName] {
        &self.san
    }

    /// Returns whether this certificate may sign other certificates.
    #[must_use]
    pub const fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Returns true if `now` falls outside the validity window.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after < now
    }
}

/// Validates a certificate against its issuing CA certificate at `now`.
///
/// Checks the validity windows of both the certificate and the CA, the
/// issuer/subject relationship, the CA signature and, when `required_ext` is
/// given, that the certificate carries that extended key usage (or `any`).
///
/// # Errors
///
/// Returns an error describing the first failed check.
pub fn validate_against_ca(
    cert: &Certificate,
    ca_cert: &Certificate,
    now: DateTime<Utc>,
    required_ext: Option<ExtKeyUsage>,
) -> Result<()> {
    debug!(subject = %cert.subject(), "validating certificate");

    if cert.not_after() < now {
        return Err(Error::Expired(cert.not_after()));
    }
    if cert.not_before() > now {
        return Err(Error::NotYetValid(cert.not_before()));
    }

    // The trust anchor's own window gates the chain as well.
    if ca_cert.not_after() < now {
        return Err(Error::Expired(ca_cert.not_after()));
    }
    if ca_cert.not_before() > now {
        return Err(Error::NotYetValid(ca_cert.not_before()));
    }

    if cert.issuer() != ca_cert.subject() {
        return Err(Error::Validation(format!(
            "issuer {:?} does not match CA subject {:?}",
            cert.issuer(),
            ca_cert.subject()
        )));
    }

    verify_signature(cert, ca_cert)?;

    if let Some(required) = required_ext {
        if !has_ext_key_usage(cert, required)? {
            return Err(Error::Validation(format!(
                "certificate does not allow extended key usage {:?}",
                required.name()
            )));
        }
    }

    Ok(())
}

/// Verifies that `cert` was signed by the key of `issuer`.
///
/// # Errors
///
/// Returns an error if either certificate cannot be parsed or the signature
/// does not verify.
pub fn verify_signature(cert: &Certificate, issuer: &Certificate) -> Result<()> {
    let (_, parsed_cert) = X509Certificate::from_der(cert.der())
        .map_err(|e| Error::Parse(format!("failed to parse certificate: {e}")))?;
    let (_, parsed_issuer) = X509Certificate::from_der(issuer.der())
        .map_err(|e| Error::Parse(format!("failed to parse issuer certificate: {e}")))?;

    parsed_cert
        .verify_signature(Some(parsed_issuer.public_key()))
        .map_err(|e| {
            Error::SignatureVerification(format!(
                "signature verification failed for {:?}: {:?}",
                cert.subject(),
                e
            ))
        })
}

/// Computes the pinned public-key hash of a certificate: the SHA-256 digest
/// of its Subject Public Key Info, rendered in curl's `sha256//<base64>`
/// form.
///
/// # Errors
///
/// Returns an error if the certificate cannot be parsed.
pub fn spki_sha256(cert: &Certificate) -> Result<String> {
    use base64::Engine;

    let (_, parsed) = X509Certificate::from_der(cert.der())
        .map_err(|e| Error::Parse(format!("failed to parse certificate: {e}")))?;
    let digest = Sha256::digest(parsed.public_key().raw);
    Ok(format!(
        "sha256//{}",
        base64::engine::general_purpose::STANDARD.encode(digest)
    ))
}

/// Converts a chrono timestamp to the encoder's time representation.
///
/// # Errors
///
/// Returns an error for timestamps outside the representable range.
pub fn rcgen_time(dt: DateTime<Utc>) -> Result<::time::OffsetDateTime> {
    ::time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| Error::Generation(format!("invalid timestamp: {e}")))
}

fn has_ext_key_usage(cert: &Certificate, required: ExtKeyUsage) -> Result<bool> {
    let (_, parsed) = X509Certificate::from_der(cert.der())
        .map_err(|e| Error::Parse(format!("failed to parse certificate: {e}")))?;
    let Ok(Some(eku)) = parsed.extended_key_usage() else {
        return Ok(false);
    };
    let eku = eku.value;
    Ok(match required {
        ExtKeyUsage::ServerAuth => eku.any || eku.server_auth,
        ExtKeyUsage::ClientAuth => eku.any || eku.client_auth,
        ExtKeyUsage::Any => eku.any,
    })
}

/// Folds a raw serial into 64 bits, keeping the low-order bytes.
fn fold_serial(raw: &[u8]) -> u64 {
    raw.iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

/// Extracts the common name from an X.509 name.
fn extract_common_name(name: &X509Name<'_>) -> Result<String> {
    for rdn in name.iter() {
        for attr in rdn.iter() {
            if attr.attr_type() == &x509_parser::oid_registry::OID_X509_COMMON_NAME {
                return attr
                    .as_str()
                    .map(String::from)
                    .map_err(|e| Error::Parse(format!("failed to parse CN: {e}")));
            }
        }
    }
    Err(Error::Parse("common name not found".into()))
}

/// Extracts SANs from a certificate.
fn extract_san(cert: &X509Certificate<'_>) -> Vec<SubjectAltName> {
    let mut sans = Vec::new();

    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            match name {
                GeneralName::DNSName(dns) => {
                    sans.push(SubjectAltName::Dns((*dns).to_string()));
                }
                GeneralName::IPAddress(ip_bytes) => {
                    if let Some(ip) = parse_ip_bytes(ip_bytes) {
                        sans.push(SubjectAltName::Ip(ip));
                    }
                }
                GeneralName::RFC822Name(email) => {
                    sans.push(SubjectAltName::Email((*email).to_string()));
                }
                _ => {}
            }
        }
    }

    sans
}

/// Parses IP address bytes into an `IpAddr`.
fn parse_ip_bytes(bytes: &[u8]) -> Option<std::net::IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(std::net::IpAddr::V4(std::net::Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(std::net::IpAddr::V6(std::net::Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
