//! gRPC service implementations.

use std::sync::Arc;

use chrono::Utc;
use inkan_ca::Identity;
use inkan_proto::certificate_service_server::CertificateService;
use inkan_proto::hello_service_server::HelloService;
use inkan_proto::version_service_server::VersionService;
use inkan_proto::{
    HelloRequest, HelloResponse, IssueCertificateRequest, IssueCertificateResponse, IssueEntry,
    ListCertificatesRequest, ListCertificatesResponse, VersionRequest, VersionResponse,
};
use inkan_storage::Storage;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::error::status_from_ca_error;
use crate::metrics::ServerMetrics;

/// Liveness echo.
#[derive(Debug, Default)]
pub struct HelloSvc;

#[tonic::async_trait]
impl HelloService for HelloSvc {
    async fn hello(&self, _request: Request<HelloRequest>) -> Result<Response<HelloResponse>, Status> {
        Ok(Response::new(HelloResponse {
            build: format!("inkan {}", env!("CARGO_PKG_VERSION")),
        }))
    }
}

/// Build metadata.
#[derive(Debug, Default)]
pub struct VersionSvc;

#[tonic::async_trait]
impl VersionService for VersionSvc {
    async fn version(
        &self,
        _request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        Ok(Response::new(VersionResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: option_env!("INKAN_BUILD_COMMIT").unwrap_or("unknown").to_string(),
        }))
    }
}

/// The issuance surface.
#[derive(Debug)]
pub struct CertificateSvc {
    storage: Storage,
    metrics: Arc<ServerMetrics>,
}

impl CertificateSvc {
    pub(crate) fn new(storage: Storage, metrics: Arc<ServerMetrics>) -> Self {
        Self { storage, metrics }
    }

    async fn issue(
        &self,
        request: Request<IssueCertificateRequest>,
        identity: Identity,
    ) -> Result<Response<IssueCertificateResponse>, Status> {
        let message = request.into_inner();
        let signing_request = inkan_proto::signing_request_from_proto(&message)?;
        let profile = self
            .storage
            .profile(&message.profile)
            .map_err(|e| match e {
                inkan_storage::Error::ProfileNotFound(_)
                | inkan_storage::Error::InvalidName(_) => Status::not_found(e.to_string()),
                other => Status::internal(other.to_string()),
            })?;

        let issued = tokio::task::spawn_blocking(move || {
            inkan_ca::issue(&profile, &signing_request, &identity, Utc::now())
        })
        .await
        .map_err(|e| Status::internal(format!("issuance task failed: {e}")))?
        .map_err(|e| status_from_ca_error(&e))?;

        self.metrics.inc_issued();
        Ok(Response::new(IssueCertificateResponse {
            certificate_pem: issued.certificate_pem,
            chain_pem: issued.chain_pem,
            serial: issued.serial,
        }))
    }
}

#[tonic::async_trait]
impl CertificateService for CertificateSvc {
    async fn issue_certificate(
        &self,
        request: Request<IssueCertificateRequest>,
    ) -> Result<Response<IssueCertificateResponse>, Status> {
        let identity = identity_of(&request);
        self.issue(request, identity).await
    }

    async fn bootstrap_enroll(
        &self,
        request: Request<IssueCertificateRequest>,
    ) -> Result<Response<IssueCertificateResponse>, Status> {
        let identity = identity_of(&request);
        if identity != Identity::BootstrapToken {
            return Err(Status::permission_denied(
                "bootstrap enrollment requires the bootstrap token",
            ));
        }
        let subject = request
            .get_ref()
            .subject
            .as_ref()
            .map_or("", |s| s.common_name.as_str());
        info!(subject, "bootstrap enrollment");
        self.issue(request, identity).await
    }

    async fn list_certificates(
        &self,
        request: Request<ListCertificatesRequest>,
    ) -> Result<Response<ListCertificatesResponse>, Status> {
        if identity_of(&request).is_anonymous() {
            return Err(Status::permission_denied(
                "listing requires an authenticated caller",
            ));
        }

        let message = request.into_inner();
        let profile = self
            .storage
            .profile(&message.profile)
            .map_err(|e| Status::not_found(e.to_string()))?;
        let db = inkan_storage::IssueDb::open(profile.issue_db_path());
        let entries = db
            .entries()
            .map_err(|e| Status::internal(e.to_string()))?
            .iter()
            .map(inkan_proto::issue_entry_to_proto)
            .collect::<Vec<IssueEntry>>();

        Ok(Response::new(ListCertificatesResponse { entries }))
    }
}

/// Reads the identity the authentication layer attached to the request.
fn identity_of<T>(request: &Request<T>) -> Identity {
    request
        .extensions()
        .get::<Identity>()
        .cloned()
        .unwrap_or(Identity::Anonymous)
}
