//! Authenticated principals.

use std::fmt;

/// The identity a request was authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No credentials presented.
    Anonymous,
    /// The request carried the bootstrap bearer token.
    BootstrapToken,
    /// The request presented a client certificate issued under our CA.
    ClientCert {
        /// Subject common name of the presented certificate.
        common_name: String,
    },
}

impl Identity {
    /// Returns the `auth.sub` value this identity is logged under.
    #[must_use]
    pub fn subject(&self) -> &str {
        match self {
            Self::Anonymous => "anonymous",
            Self::BootstrapToken => "bootstrap",
            Self::ClientCert { common_name } => common_name,
        }
    }

    /// Returns true if no credentials were presented.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subject())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_for_logging() {
        assert_eq!(Identity::Anonymous.subject(), "anonymous");
        assert_eq!(Identity::BootstrapToken.subject(), "bootstrap");
        assert_eq!(
            Identity::ClientCert {
                common_name: "node-1".into()
            }
            .subject(),
            "node-1"
        );
    }

    #[test]
    fn anonymity_check() {
        assert!(Identity::Anonymous.is_anonymous());
        assert!(!Identity::BootstrapToken.is_anonymous());
    }
}
