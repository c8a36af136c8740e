//! Minimal PEM framing.

use base64::Engine;

use crate::error::{Error, Result};

/// Standard label of an X.509 certificate block.
pub const CERTIFICATE: &str = "CERTIFICATE";
/// Standard label of a PKCS#10 certification request block.
pub const CERTIFICATE_REQUEST: &str = "CERTIFICATE REQUEST";

/// Encodes DER bytes as a single PEM block with the given label.
#[must_use]
pub fn encode(label: &str, der: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    let body = b64
        .as_bytes()
        .chunks(64)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");
    format!("-----BEGIN {label}-----\n{body}\n-----END {label}-----\n")
}

/// Decodes the first PEM block with the given label.
///
/// # Errors
///
/// Returns an error if no block with the label is present or the body is not
/// valid base64.
pub fn decode(label: &str, pem: &str) -> Result<Vec<u8>> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let mut body = String::new();
    let mut in_block = false;
    for line in pem.lines() {
        let line = line.trim();
        if line == begin {
            in_block = true;
            continue;
        }
        if line == end {
            if !in_block {
                break;
            }
            return base64::engine::general_purpose::STANDARD
                .decode(body.as_bytes())
                .map_err(|e| Error::Parse(format!("invalid base64 in {label} block: {e}")));
        }
        if in_block {
            body.push_str(line);
        }
    }
    Err(Error::Parse(format!("no {label} block found")))
}
