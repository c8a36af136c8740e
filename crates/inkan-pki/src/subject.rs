//! Subject distinguished names.

use std::fmt;

use rcgen::DnType;
use serde::{Deserialize, Serialize};

/// X.509 subject distinguished name components.
///
/// Empty fields are omitted from the encoded name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistinguishedName {
    /// Common name (CN).
    pub common_name: String,
    /// Organization (O).
    pub organization: String,
    /// Organizational unit (OU).
    pub organizational_unit: String,
    /// Country (C).
    pub country: String,
    /// Locality (L).
    pub locality: String,
    /// State or province (ST).
    pub province: String,
    /// Street address.
    pub street_address: String,
    /// Postal code.
    pub postal_code: String,
}

// streetAddress and postalCode have no named DnType in the encoder.
const OID_STREET_ADDRESS: &[u64] = &[2, 5, 4, 9];
const OID_POSTAL_CODE: &[u64] = &[2, 5, 4, 17];

impl DistinguishedName {
    /// Creates a name carrying only a common name.
    #[must_use]
    pub fn with_common_name(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            ..Self::default()
        }
    }

    /// Converts the name to its encoder representation.
    #[must_use]
    pub fn to_rcgen(&self) -> rcgen::DistinguishedName {
        let mut dn = rcgen::DistinguishedName::new();
        if !self.country.is_empty() {
            dn.push(DnType::CountryName, &*self.country);
        }
        if !self.province.is_empty() {
            dn.push(DnType::StateOrProvinceName, &*self.province);
        }
        if !self.locality.is_empty() {
            dn.push(DnType::LocalityName, &*self.locality);
        }
        if !self.street_address.is_empty() {
            dn.push(
                DnType::CustomDnType(OID_STREET_ADDRESS.to_vec()),
                &*self.street_address,
            );
        }
        if !self.postal_code.is_empty() {
            dn.push(
                DnType::CustomDnType(OID_POSTAL_CODE.to_vec()),
                &*self.postal_code,
            );
        }
        if !self.organization.is_empty() {
            dn.push(DnType::OrganizationName, &*self.organization);
        }
        if !self.organizational_unit.is_empty() {
            dn.push(DnType::OrganizationalUnitName, &*self.organizational_unit);
        }
        if !self.common_name.is_empty() {
            dn.push(DnType::CommonName, &*self.common_name);
        }
        dn
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (label, value) in [
            ("CN", &self.common_name),
            ("O", &self.organization),
            ("OU", &self.organizational_unit),
            ("C", &self.country),
            ("L", &self.locality),
            ("ST", &self.province),
        ] {
            if value.is_empty() {
                continue;
            }
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{label}={value}")?;
            first = false;
        }
        if first {
            write!(f, "<empty subject>")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_common_name_sets_only_cn() {
        let dn = DistinguishedName::with_common_name("alice");
        assert_eq!(dn.common_name, "alice");
        assert!(dn.organization.is_empty());
    }

    #[test]
    fn display_skips_empty_components() {
        let dn = DistinguishedName {
            common_name: "Test CA".into(),
            organization: "inkan".into(),
            ..DistinguishedName::default()
        };
        assert_eq!(dn.to_string(), "CN=Test CA, O=inkan");
    }

    #[test]
    fn display_of_empty_subject() {
        assert_eq!(DistinguishedName::default().to_string(), "<empty subject>");
    }

    #[test]
    fn serde_defaults_missing_fields() {
        let dn: DistinguishedName =
            serde_json::from_str(r#"{"common_name":"alice"}"#).unwrap();
        assert_eq!(dn.common_name, "alice");
        assert!(dn.postal_code.is_empty());
    }
}
