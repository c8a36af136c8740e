//! Key usage catalog.
//!
//! Translates named presets and explicit usage-name lists into the X.509
//! key-usage and extended-key-usage sets a certificate carries. The catalog
//! owns naming and mutual-exclusion rules only; bit layout belongs to the
//! encoder.

use rcgen::{ExtendedKeyUsagePurpose, KeyUsagePurpose};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Base key-usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseKeyUsage {
    /// digitalSignature
    DigitalSignature,
    /// keyEncipherment
    KeyEncipherment,
    /// keyCertSign
    CertSign,
    /// cRLSign
    CrlSign,
}

impl BaseKeyUsage {
    /// Returns the configuration name of this flag.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DigitalSignature => "digitalSignature",
            Self::KeyEncipherment => "keyEncipherment",
            Self::CertSign => "certSign",
            Self::CrlSign => "crlSign",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "digitalSignature" => Ok(Self::DigitalSignature),
            "keyEncipherment" => Ok(Self::KeyEncipherment),
            "certSign" => Ok(Self::CertSign),
            "crlSign" => Ok(Self::CrlSign),
            other => Err(Error::InvalidKeyUsage(format!(
                "unknown keyUsage {other:?}"
            ))),
        }
    }
}

/// Extended key-usage entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtKeyUsage {
    /// TLS server authentication.
    ServerAuth,
    /// TLS client authentication.
    ClientAuth,
    /// anyExtendedKeyUsage.
    Any,
}

impl ExtKeyUsage {
    /// Returns the configuration name of this entry.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ServerAuth => "serverAuth",
            Self::ClientAuth => "clientAuth",
            Self::Any => "any",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "serverAuth" => Ok(Self::ServerAuth),
            "clientAuth" => Ok(Self::ClientAuth),
            "any" => Ok(Self::Any),
            other => Err(Error::InvalidKeyUsage(format!(
                "unknown extKeyUsage {other:?}"
            ))),
        }
    }
}

/// The key-usage shape requested for a certificate: a base flag set plus an
/// extended usage list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUsages {
    /// Base key-usage flags.
    pub key_usage: Vec<BaseKeyUsage>,
    /// Extended key usages.
    pub ext_key_usage: Vec<ExtKeyUsage>,
}

impl KeyUsages {
    /// The usage set of a certificate authority.
    ///
    /// Extended key usages are omitted; they generally appear only in end
    /// entity certificates.
    #[must_use]
    pub fn ca() -> Self {
        Self {
            key_usage: vec![BaseKeyUsage::CertSign, BaseKeyUsage::CrlSign],
            ext_key_usage: Vec::new(),
        }
    }

    /// The usage set of a TLS server certificate.
    #[must_use]
    pub fn tls_server() -> Self {
        Self {
            key_usage: vec![BaseKeyUsage::KeyEncipherment, BaseKeyUsage::DigitalSignature],
            ext_key_usage: vec![ExtKeyUsage::ServerAuth],
        }
    }

    /// The usage set of a TLS client certificate.
    #[must_use]
    pub fn tls_client() -> Self {
        Self {
            key_usage: vec![BaseKeyUsage::KeyEncipherment, BaseKeyUsage::DigitalSignature],
            ext_key_usage: vec![ExtKeyUsage::ClientAuth],
        }
    }

    /// The usage set of a certificate valid for both TLS roles.
    #[must_use]
    pub fn tls_client_server() -> Self {
        Self {
            key_usage: vec![BaseKeyUsage::KeyEncipherment, BaseKeyUsage::DigitalSignature],
            ext_key_usage: vec![ExtKeyUsage::ClientAuth, ExtKeyUsage::ServerAuth],
        }
    }

    /// Expands a preset name into its canonical usage set.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown preset names, echoing the offending token.
    pub fn from_preset(name: &str) -> Result<Self> {
        match name {
            "tlsServer" => Ok(Self::tls_server()),
            "tlsClient" => Ok(Self::tls_client()),
            "tlsClientServer" => Ok(Self::tls_client_server()),
            "ca" => Ok(Self::ca()),
            other => Err(Error::InvalidKeyUsage(format!(
                "unknown preset {other:?}"
            ))),
        }
    }

    /// Builds a usage set from either a preset name or explicit usage-name
    /// lists.
    ///
    /// # Errors
    ///
    /// Returns an error if a preset is combined with explicit lists, if `any`
    /// is combined with other extended usages, or if a name is unknown.
    pub fn from_spec(
        preset: Option<&str>,
        key_usage: &[String],
        ext_key_usage: &[String],
    ) -> Result<Self> {
        if let Some(name) = preset {
            if !key_usage.is_empty() || !ext_key_usage.is_empty() {
                return Err(Error::InvalidKeyUsage(
                    "preset and explicit keyUsage/extKeyUsage cannot be specified at once"
                        .to_string(),
                ));
            }
            return Self::from_preset(name);
        }

        let key_usage = key_usage
            .iter()
            .map(|s| BaseKeyUsage::parse(s))
            .collect::<Result<Vec<_>>>()?;
        let ext_key_usage = ext_key_usage
            .iter()
            .map(|s| ExtKeyUsage::parse(s))
            .collect::<Result<Vec<_>>>()?;

        let usages = Self {
            key_usage,
            ext_key_usage,
        };
        usages.validate()?;
        Ok(usages)
    }

    /// Checks the mutual-exclusion rules of the set.
    ///
    /// # Errors
    ///
    /// Returns an error if `any` coexists with other extended usages.
    pub fn validate(&self) -> Result<()> {
        if self.ext_key_usage.contains(&ExtKeyUsage::Any) && self.ext_key_usage.len() > 1 {
            return Err(Error::InvalidKeyUsage(
                "extKeyUsage \"any\" cannot be combined with other extKeyUsages".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns true if neither base nor extended usages are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.key_usage.is_empty() && self.ext_key_usage.is_empty()
    }

    /// Returns true if the set contains the given extended usage.
    #[must_use]
    pub fn has_ext(&self, usage: ExtKeyUsage) -> bool {
        self.ext_key_usage.contains(&usage)
    }

    /// Returns true if the set contains the given base flag.
    #[must_use]
    pub fn has_base(&self, usage: BaseKeyUsage) -> bool {
        self.key_usage.contains(&usage)
    }

    /// Converts the base flags to their encoder representation.
    #[must_use]
    pub fn rcgen_key_usages(&self) -> Vec<KeyUsagePurpose> {
        self.key_usage
            .iter()
            .map(|u| match u {
                BaseKeyUsage::DigitalSignature => KeyUsagePurpose::DigitalSignature,
                BaseKeyUsage::KeyEncipherment => KeyUsagePurpose::KeyEncipherment,
                BaseKeyUsage::CertSign => KeyUsagePurpose::KeyCertSign,
                BaseKeyUsage::CrlSign => KeyUsagePurpose::CrlSign,
            })
            .collect()
    }

    /// Converts the extended usages to their encoder representation.
    #[must_use]
    pub fn rcgen_ext_key_usages(&self) -> Vec<ExtendedKeyUsagePurpose> {
        self.ext_key_usage
            .iter()
            .map(|u| match u {
                ExtKeyUsage::ServerAuth => ExtendedKeyUsagePurpose::ServerAuth,
                ExtKeyUsage::ClientAuth => ExtendedKeyUsagePurpose::ClientAuth,
                ExtKeyUsage::Any => ExtendedKeyUsagePurpose::Any,
            })
            .collect()
    }
}
