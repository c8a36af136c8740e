//! gRPC wire definitions and conversions to the domain types.

tonic::include_proto!("inkan");

use chrono::{DateTime, Utc};
use inkan_ca::SigningRequest;

/// Maps a wire issuance request to a domain signing request.
///
/// Validation errors surface as [`tonic::Status::invalid_argument`] before
/// the engine runs.
pub fn signing_request_from_proto(
    req: &IssueCertificateRequest,
) -> Result<SigningRequest, tonic::Status> {
    let subject = req
        .subject
        .as_ref()
        .map(subject_from_proto)
        .unwrap_or_default();

    let names = req
        .names
        .iter()
        .map(|s| inkan_pki::SubjectAltName::parse(s))
        .collect::<inkan_pki::Result<Vec<_>>>()
        .map_err(|e| tonic::Status::invalid_argument(e.to_string()))?;

    let key_usages = match &req.key_usages {
        Some(ku) => {
            let preset = (!ku.preset.is_empty()).then_some(ku.preset.as_str());
            inkan_pki::KeyUsages::from_spec(preset, &ku.key_usage, &ku.ext_key_usage)
                .map_err(|e| tonic::Status::invalid_argument(e.to_string()))?
        }
        None => inkan_pki::KeyUsages::default(),
    };

    Ok(SigningRequest {
        subject,
        names,
        key_usages,
        not_before: timestamp(req.not_before)?,
        not_after: timestamp(req.not_after)?,
        csr_pem: req.csr_pem.clone(),
    })
}

fn subject_from_proto(subject: &Subject) -> inkan_pki::DistinguishedName {
    inkan_pki::DistinguishedName {
        common_name: subject.common_name.clone(),
        organization: subject.organization.clone(),
        organizational_unit: subject.organizational_unit.clone(),
        country: subject.country.clone(),
        locality: subject.locality.clone(),
        province: subject.province.clone(),
        street_address: subject.street_address.clone(),
        postal_code: subject.postal_code.clone(),
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, tonic::Status> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| tonic::Status::invalid_argument(format!("invalid timestamp {secs}")))
}

/// Maps a folded journal entry to its wire form.
#[must_use]
pub fn issue_entry_to_proto(entry: &inkan_storage::IssueEntry) -> IssueEntry {
    let state = match entry.state {
        inkan_storage::IssueState::IssueInProgress => IssueState::InProgress,
        inkan_storage::IssueState::ActiveCertificate => IssueState::Active,
    };
    IssueEntry {
        serial: entry.serial,
        state: state.into(),
        certificate_pem: entry.pem.clone(),
        created_at: entry.created_at.to_rfc3339(),
    }
}
