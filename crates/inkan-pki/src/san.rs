//! Subject alternative names.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use rcgen::{Ia5String, SanType};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single subject alternative name entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectAltName {
    /// DNS name.
    Dns(String),
    /// IP address.
    Ip(IpAddr),
    /// Email address.
    Email(String),
}

impl SubjectAltName {
    /// Parses a SAN entry from its string form.
    ///
    /// IP address literals become [`SubjectAltName::Ip`], strings containing
    /// `@` become [`SubjectAltName::Email`], everything else is checked as a
    /// DNS name.
    ///
    /// # Errors
    ///
    /// Returns an error for empty or syntactically invalid entries.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::San("empty entry".to_string()));
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self::Ip(ip));
        }
        if s.contains('@') {
            return Ok(Self::Email(s.to_string()));
        }
        if !is_valid_dns_name(s) {
            return Err(Error::San(format!("invalid DNS name {s:?}")));
        }
        Ok(Self::Dns(s.to_string()))
    }
}

impl fmt::Display for SubjectAltName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns(name) => write!(f, "{name}"),
            Self::Ip(ip) => write!(f, "{ip}"),
            Self::Email(email) => write!(f, "{email}"),
        }
    }
}

/// Checks DNS name syntax: non-empty dot-separated labels of letters, digits
/// and hyphens, with a leading `*.` wildcard label allowed.
fn is_valid_dns_name(s: &str) -> bool {
    let s = s.strip_prefix("*.").unwrap_or(s);
    if s.is_empty() || s.len() > 253 {
        return false;
    }
    s.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

/// Converts SAN entries to their encoder representation.
///
/// # Errors
///
/// Returns an error if an entry cannot be represented as an IA5 string.
pub fn to_rcgen_sans(sans: &[SubjectAltName]) -> Result<Vec<SanType>> {
    sans.iter()
        .map(|san| match san {
            SubjectAltName::Dns(dns) => {
                let ia5 = Ia5String::try_from(dns.clone())
                    .map_err(|e| Error::San(format!("invalid DNS name {dns:?}: {e}")))?;
                Ok(SanType::DnsName(ia5))
            }
            SubjectAltName::Ip(ip) => Ok(SanType::IpAddress(*ip)),
            SubjectAltName::Email(email) => {
                let ia5 = Ia5String::try_from(email.clone())
                    .map_err(|e| Error::San(format!("invalid email {email:?}: {e}")))?;
                Ok(SanType::Rfc822Name(ia5))
            }
        })
        .collect()
}

/// Derives the SAN set a server certificate needs to cover the given listen
/// address.
///
/// The set contains the listen host when it is concrete, the system hostname,
/// `localhost` and the loopback addresses. The result is stable across calls
/// on a host with stable naming.
#[must_use]
pub fn names_for_host(listen_addr: &str) -> Vec<SubjectAltName> {
    let mut names: Vec<SubjectAltName> = Vec::new();
    let mut push = |name: SubjectAltName| {
        if !names.contains(&name) {
            names.push(name);
        }
    };

    let host = listen_addr
        .rsplit_once(':')
        .map_or(listen_addr, |(host, _port)| host)
        .trim_start_matches('[')
        .trim_end_matches(']');
    if !host.is_empty() {
        if let Ok(ip) = host.parse::<IpAddr>() {
            if !ip.is_unspecified() {
                push(SubjectAltName::Ip(ip));
            }
        } else if is_valid_dns_name(host) {
            push(SubjectAltName::Dns(host.to_string()));
        }
    }

    if let Ok(hostname) = hostname::get() {
        let hostname = hostname.to_string_lossy();
        if is_valid_dns_name(&hostname) {
            push(SubjectAltName::Dns(hostname.into_owned()));
        }
    }

    push(SubjectAltName::Dns("localhost".to_string()));
    push(SubjectAltName::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    push(SubjectAltName::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));

    names
}

/// Returns true if `have` covers every entry of `want`.
#[must_use]
pub fn covers(have: &[SubjectAltName], want: &[SubjectAltName]) -> bool {
    want.iter().all(|name| have.contains(name))
}
