//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use inkan_pki::SubjectAltName;

/// Configuration for the issuance server.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// Address to bind the TLS listener to.
    pub listen_addr: SocketAddr,
    /// Bootstrap bearer token; `None` disables bootstrap enrollment.
    pub bootstrap_token: Option<String>,
    /// Close the server after this wall-clock interval.
    pub auto_shutdown: Option<Duration>,
    /// Number of issuances permitted through `POST /issue`; zero leaves the
    /// endpoint unmounted.
    pub issue_http: u32,
    /// Explicit SAN set for the server certificate; empty derives one from
    /// the listen address.
    pub names: Vec<SubjectAltName>,
}

impl ServeConfig {
    /// Create a configuration with the given listen address.
    #[must_use]
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            bootstrap_token: None,
            auto_shutdown: None,
            issue_http: 0,
            names: Vec::new(),
        }
    }

    /// Set the bootstrap bearer token.
    #[must_use]
    pub fn with_bootstrap_token(mut self, token: impl Into<String>) -> Self {
        self.bootstrap_token = Some(token.into());
        self
    }

    /// Set the auto-shutdown interval.
    #[must_use]
    pub fn with_auto_shutdown(mut self, after: Duration) -> Self {
        self.auto_shutdown = Some(after);
        self
    }

    /// Set the HTTP issuance budget.
    #[must_use]
    pub const fn with_issue_http(mut self, count: u32) -> Self {
        self.issue_http = count;
        self
    }

    /// Set an explicit SAN set for the server certificate.
    #[must_use]
    pub fn with_names(mut self, names: Vec<SubjectAltName>) -> Self {
        self.names = names;
        self
    }
}
