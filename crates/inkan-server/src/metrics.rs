//! Prometheus metrics for the issuance server.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

/// Label set for handled RPCs.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RpcLabels {
    /// Full RPC method path.
    pub method: String,
    /// Final status code name.
    pub code: String,
}

/// Server metric surface, registered once at startup.
pub struct ServerMetrics {
    registry: Registry,
    /// RPCs handled, by method and status code.
    rpc_handled: Family<RpcLabels, Counter>,
    /// Certificates issued over any surface.
    certificates_issued: Counter,
}

impl ServerMetrics {
    /// Creates and registers the metric families.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let rpc_handled = Family::<RpcLabels, Counter>::default();
        registry.register(
            "inkan_rpc_handled",
            "RPCs handled by method and status code",
            rpc_handled.clone(),
        );

        let certificates_issued = Counter::default();
        registry.register(
            "inkan_certificates_issued",
            "Certificates issued",
            certificates_issued.clone(),
        );

        Self {
            registry,
            rpc_handled,
            certificates_issued,
        }
    }

    /// Records one handled RPC.
    pub fn observe_rpc(&self, method: &str, code: &str) {
        self.rpc_handled
            .get_or_create(&RpcLabels {
                method: method.to_string(),
                code: code.to_string(),
            })
            .inc();
    }

    /// Records one issued certificate.
    pub fn inc_issued(&self) {
        self.certificates_issued.inc();
    }

    /// Encodes the registry in text exposition format.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        if encode(&mut buf, &self.registry).is_err() {
            buf.clear();
        }
        buf
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerMetrics").finish_non_exhaustive()
    }
}
