//! The HTTP side of the shared listener.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use inkan_ca::SigningRequest;
use inkan_pki::KeyUsages;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::Authenticator;
use crate::error::status_from_ca_error;
use crate::metrics::ServerMetrics;
use crate::mux::PeerCerts;
use inkan_storage::Storage;

/// Shared state of the HTTP router.
#[derive(Clone)]
pub(crate) struct HttpState {
    pub storage: Storage,
    pub authenticator: Arc<Authenticator>,
    pub metrics: Arc<ServerMetrics>,
    /// Remaining `POST /issue` budget; `None` leaves the route unmounted.
    pub issue_remaining: Option<Arc<AtomicU32>>,
}

/// Builds the HTTP router: `/healthz`, `/metrics` and, budget permitting,
/// `/issue`.
pub(crate) fn router(state: HttpState) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics));
    if state.issue_remaining.is_some() {
        router = router.route("/issue", post(issue));
    }
    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "ok\n")
}

async fn metrics(State(state): State<HttpState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.encode(),
    )
}

/// Body of a `POST /issue` request.
#[derive(Debug, Deserialize)]
struct IssueHttpRequest {
    profile: String,
    common_name: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    preset: Option<String>,
    #[serde(default = "default_days")]
    days: i64,
    csr_pem: String,
}

const fn default_days() -> i64 {
    365
}

async fn issue(
    State(state): State<HttpState>,
    headers: HeaderMap,
    request: Request<Body>,
) -> Response {
    // The mount decision is re-derived from the live counter: a spent
    // budget answers exactly like a route that was never mounted.
    let Some(counter) = state.issue_remaining.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if counter.load(Ordering::SeqCst) == 0 {
        return StatusCode::NOT_FOUND.into_response();
    }

    let peer = request
        .extensions()
        .get::<PeerCerts>()
        .cloned()
        .unwrap_or_default();
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let identity = match state
        .authenticator
        .authenticate(&peer.0, authorization, Utc::now())
    {
        Ok(identity) if !identity.is_anonymous() => identity,
        Ok(_) => {
            return (StatusCode::UNAUTHORIZED, "authentication required\n").into_response();
        }
        Err(e) => return (StatusCode::UNAUTHORIZED, format!("{e}\n")).into_response(),
    };

    let body = match axum::body::to_bytes(request.into_body(), 1 << 20).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("unreadable body: {e}\n")).into_response(),
    };
    let Json(form): Json<IssueHttpRequest> = match Json::from_bytes(&body) {
        Ok(form) => form,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("{e}\n")).into_response(),
    };

    let now = Utc::now();
    let names = match form
        .names
        .iter()
        .map(|s| inkan_pki::SubjectAltName::parse(s))
        .collect::<inkan_pki::Result<Vec<_>>>()
    {
        Ok(names) => names,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("{e}\n")).into_response(),
    };
    let key_usages = match form.preset.as_deref() {
        Some(preset) => match KeyUsages::from_preset(preset) {
            Ok(usages) => usages,
            Err(e) => return (StatusCode::BAD_REQUEST, format!("{e}\n")).into_response(),
        },
        None => KeyUsages::tls_client(),
    };
    let signing_request = SigningRequest {
        subject: inkan_pki::DistinguishedName::with_common_name(&form.common_name),
        names,
        key_usages,
        not_before: now,
        not_after: now + Duration::days(form.days),
        csr_pem: form.csr_pem,
    };

    let profile = match state.storage.profile(&form.profile) {
        Ok(profile) => profile,
        Err(e) => return (StatusCode::NOT_FOUND, format!("{e}\n")).into_response(),
    };

    let issued = match tokio::task::spawn_blocking(move || {
        inkan_ca::issue(&profile, &signing_request, &identity, now)
    })
    .await
    {
        Ok(Ok(issued)) => issued,
        Ok(Err(e)) => {
            let status = status_from_ca_error(&e);
            return (http_code(&status), format!("{}\n", status.message())).into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("issuance task failed: {e}\n"),
            )
                .into_response();
        }
    };

    // Burn one slot only on success; at zero the route unmounts.
    let remaining = counter.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
    state.metrics.inc_issued();
    info!(serial = issued.serial, remaining, "issued certificate over http");

    (
        [(header::CONTENT_TYPE, "application/x-pem-file")],
        format!("{}{}", issued.certificate_pem, issued.chain_pem),
    )
        .into_response()
}

fn http_code(status: &tonic::Status) -> StatusCode {
    match status.code() {
        tonic::Code::InvalidArgument => StatusCode::BAD_REQUEST,
        tonic::Code::NotFound => StatusCode::NOT_FOUND,
        tonic::Code::PermissionDenied => StatusCode::FORBIDDEN,
        tonic::Code::FailedPrecondition => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Renders the sample `curl` invocation printed at startup when the HTTP
/// issue endpoint is enabled.
pub(crate) fn curl_string(listen_addr: &str, pubkey_hash: &str, token: Option<&str>) -> String {
    let auth = token.map_or_else(String::new, |t| {
        format!(" -H 'Authorization: bearer {t}'")
    });
    format!(
        "curl --pinnedpubkey {pubkey_hash} -k{auth} -d '{{\"profile\":\"auth\",\"common_name\":\"node-1\",\"csr_pem\":\"...\"}}' https://{listen_addr}/issue"
    )
}
