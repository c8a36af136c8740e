//! Key types, key generation and public-key acceptance policy.

use std::fmt;
use std::str::FromStr;

use rsa::pkcs8::EncodePrivateKey;
use tracing::debug;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use crate::error::{Error, Result};

/// Supported private-key types for generated material.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyType {
    /// ECDSA over NIST P-256.
    #[default]
    EcdsaP256,
    /// Ed25519.
    Ed25519,
    /// RSA with a 2048-bit modulus.
    Rsa2048,
    /// RSA with a 4096-bit modulus.
    Rsa4096,
}

impl KeyType {
    /// Generates a fresh key pair of this type.
    ///
    /// RSA keys are produced by the `rsa` crate and imported as PKCS#8; the
    /// other types are generated directly.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or import fails.
    pub fn generate(self) -> Result<rcgen::KeyPair> {
        debug!(key_type = %self, "generating key pair");
        match self {
            Self::EcdsaP256 => rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
                .map_err(|e| Error::Generation(format!("failed to generate P-256 key: {e}"))),
            Self::Ed25519 => rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519)
                .map_err(|e| Error::Generation(format!("failed to generate Ed25519 key: {e}"))),
            Self::Rsa2048 => generate_rsa(2048),
            Self::Rsa4096 => generate_rsa(4096),
        }
    }
}

fn generate_rsa(bits: usize) -> Result<rcgen::KeyPair> {
    let mut rng = rand::thread_rng();
    let key = rsa::RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| Error::Generation(format!("failed to generate RSA-{bits} key: {e}")))?;
    let der = key
        .to_pkcs8_der()
        .map_err(|e| Error::Generation(format!("failed to encode RSA key: {e}")))?;
    rcgen::KeyPair::try_from(der.as_bytes())
        .map_err(|e| Error::Generation(format!("failed to import RSA key: {e}")))
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ecdsa" | "ecdsa-p256" => Ok(Self::EcdsaP256),
            "ed25519" => Ok(Self::Ed25519),
            "rsa" | "rsa-2048" => Ok(Self::Rsa2048),
            "rsa-4096" => Ok(Self::Rsa4096),
            other => Err(Error::Parse(format!("unknown key type {other:?}"))),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EcdsaP256 => "ecdsa-p256",
            Self::Ed25519 => "ed25519",
            Self::Rsa2048 => "rsa-2048",
            Self::Rsa4096 => "rsa-4096",
        };
        write!(f, "{name}")
    }
}

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_ED25519: &str = "1.3.101.112";
const OID_CURVE_P256: &str = "1.2.840.10045.3.1.7";
const OID_CURVE_P384: &str = "1.3.132.0.34";

/// Minimum accepted RSA modulus size in bits.
pub const MIN_RSA_BITS: usize = 2048;

/// Checks that a network-supplied public key meets the acceptance policy:
/// RSA with a modulus of at least [`MIN_RSA_BITS`], ECDSA over P-256/P-384,
/// or Ed25519.
///
/// # Errors
///
/// Returns [`Error::UnsupportedKey`] for anything else.
pub fn check_public_key(spki: &SubjectPublicKeyInfo<'_>) -> Result<()> {
    let alg = spki.algorithm.algorithm.to_id_string();
    match alg.as_str() {
        OID_RSA_ENCRYPTION => {
            let parsed = spki
                .parsed()
                .map_err(|e| Error::Parse(format!("failed to parse RSA public key: {e}")))?;
            let PublicKey::RSA(rsa_key) = parsed else {
                return Err(Error::UnsupportedKey(
                    "RSA algorithm with non-RSA key material".to_string(),
                ));
            };
            let leading_zeros = rsa_key
                .modulus
                .iter()
                .take_while(|byte| **byte == 0)
                .count();
            let bits = (rsa_key.modulus.len() - leading_zeros) * 8;
            if bits < MIN_RSA_BITS {
                return Err(Error::UnsupportedKey(format!(
                    "RSA modulus of {bits} bits is below the {MIN_RSA_BITS}-bit minimum"
                )));
            }
            Ok(())
        }
        OID_EC_PUBLIC_KEY => {
            let curve = spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|p| p.as_oid().ok())
                .map(|oid| oid.to_id_string())
                .unwrap_or_default();
            match curve.as_str() {
                OID_CURVE_P256 | OID_CURVE_P384 => Ok(()),
                _ => Err(Error::UnsupportedKey(format!(
                    "unsupported EC curve {curve:?}"
                ))),
            }
        }
        OID_ED25519 => Ok(()),
        other => Err(Error::UnsupportedKey(format!(
            "unsupported key algorithm {other}"
        ))),
    }
}
