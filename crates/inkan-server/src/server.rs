//! The issuance server: one TLS listener hosting gRPC and HTTP.

use std::net::SocketAddr;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderValue, Request, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use inkan_proto::certificate_service_server::CertificateServiceServer;
use inkan_proto::hello_service_server::HelloServiceServer;
use inkan_proto::version_service_server::VersionServiceServer;
use inkan_storage::Storage;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_rustls::TlsAcceptor;
use tonic::service::Routes;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::authprofile;
use crate::config::ServeConfig;
use crate::error::{Result, ServerError};
use crate::http::{curl_string, router, HttpState};
use crate::metrics::ServerMetrics;
use crate::mux::{ConnRouter, PeerCerts};
use crate::services::{CertificateSvc, HelloSvc, VersionSvc};

/// A running server. Dropping the handle does not stop the server; use
/// [`Server::close`] or wait for auto-shutdown.
#[derive(Debug)]
pub struct Server {
    local_addr: SocketAddr,
    close_tx: mpsc::Sender<Option<ServerError>>,
    done_rx: oneshot::Receiver<Result<()>>,
}

/// A cloneable handle that can initiate shutdown.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    close_tx: mpsc::Sender<Option<ServerError>>,
}

impl CloseHandle {
    /// Initiates shutdown with an optional cause.
    pub async fn close(&self, cause: Option<ServerError>) {
        let _ = self.close_tx.send(cause).await;
    }
}

impl Server {
    /// Binds the listener, provisions the auth profile and starts accepting
    /// in the background. Returns as soon as the listener is bound.
    ///
    /// # Errors
    ///
    /// Returns provisioning, TLS or bind failures.
    pub async fn start(storage: Storage, cfg: ServeConfig) -> Result<Self> {
        let now = Utc::now();

        let names = if cfg.names.is_empty() {
            inkan_pki::names_for_host(&cfg.listen_addr.to_string())
        } else {
            cfg.names.clone()
        };

        let material = authprofile::ensure(&storage, &names, now)?;
        let authenticator = Arc::new(Authenticator::new(
            material.ca_cert.clone(),
            cfg.bootstrap_token.clone(),
        ));
        let tls_config =
            crate::tls::server_tls_config(&material.server_cert_pem, &material.server_key_pem)?;
        let acceptor = TlsAcceptor::from(tls_config);

        let listener = TcpListener::bind(cfg.listen_addr)
            .await
            .map_err(|e| ServerError::Bind(cfg.listen_addr, e))?;
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            pubkey_hash = %material.pubkey_hash,
            "listening"
        );
        if let Some(token) = cfg.bootstrap_token.as_deref() {
            info!(token = %token, "node bootstrap enabled");
            info!(
                "bootstrap clients with: inkan client --server {local_addr} --pinnedpubkey {} --token {token} bootstrap",
                material.pubkey_hash
            );
        }

        let metrics = Arc::new(ServerMetrics::new());

        let issue_remaining = (cfg.issue_http > 0).then(|| Arc::new(AtomicU32::new(cfg.issue_http)));
        if issue_remaining.is_some() {
            info!(budget = cfg.issue_http, "HTTP issue endpoint enabled");
            info!(
                "on clients, exec: {}",
                curl_string(
                    &local_addr.to_string(),
                    &material.pubkey_hash,
                    cfg.bootstrap_token.as_deref()
                )
            );
        }

        let http_router = router(HttpState {
            storage: storage.clone(),
            authenticator: authenticator.clone(),
            metrics: metrics.clone(),
            issue_remaining,
        });
        let rpc_router = grpc_router(storage, authenticator, metrics);

        let (close_tx, close_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(accept_loop(
            listener,
            acceptor,
            rpc_router,
            http_router,
            close_rx,
            done_tx,
        ));

        if let Some(after) = cfg.auto_shutdown {
            let handle = CloseHandle {
                close_tx: close_tx.clone(),
            };
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                info!(after = ?after, "auto-shutdown interval elapsed");
                handle.close(None).await;
            });
        }

        Ok(Self {
            local_addr,
            close_tx,
            done_rx,
        })
    }

    /// The bound listen address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a handle that can initiate shutdown.
    #[must_use]
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            close_tx: self.close_tx.clone(),
        }
    }

    /// Blocks until the server has fully stopped. The result is the shutdown
    /// cause, if one was supplied.
    ///
    /// # Errors
    ///
    /// Returns the accept-loop failure or the operator-supplied cause.
    pub async fn wait(self) -> Result<()> {
        self.done_rx.await.unwrap_or(Ok(()))
    }

    /// Initiates shutdown and waits for completion. The optional cause
    /// becomes the result of the wait.
    ///
    /// # Errors
    ///
    /// Returns the supplied cause or an accept-loop failure.
    pub async fn close(self, cause: Option<ServerError>) -> Result<()> {
        let _ = self.close_tx.send(cause).await;
        self.wait().await
    }
}

/// Assembles the RPC router: services wrapped by the authentication and
/// metrics layers.
fn grpc_router(
    storage: Storage,
    authenticator: Arc<Authenticator>,
    metrics: Arc<ServerMetrics>,
) -> Router {
    let routes = Routes::new(HelloServiceServer::new(HelloSvc))
        .add_service(VersionServiceServer::new(VersionSvc))
        .add_service(CertificateServiceServer::new(CertificateSvc::new(
            storage, metrics.clone(),
        )));

    routes
        .into_axum_router()
        .layer(axum::middleware::from_fn(move |req, next| {
            authenticate_rpc(authenticator.clone(), req, next)
        }))
        .layer(axum::middleware::from_fn(move |req, next| {
            observe_rpc(metrics.clone(), req, next)
        }))
}

/// Derives the caller identity before dispatch and attaches it to the
/// request; authentication failures never reach a handler.
async fn authenticate_rpc(
    authenticator: Arc<Authenticator>,
    mut req: Request<Body>,
    next: axum::middleware::Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<PeerCerts>()
        .cloned()
        .unwrap_or_default();
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match authenticator.authenticate(&peer.0, authorization, Utc::now()) {
        Ok(identity) => {
            debug!(auth_sub = %identity, path = %req.uri().path(), "rpc");
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => grpc_error_response(tonic::Code::Unauthenticated, &e.to_string()),
    }
}

/// Counts every handled RPC by method and final status code.
async fn observe_rpc(
    metrics: Arc<ServerMetrics>,
    req: Request<Body>,
    next: axum::middleware::Next,
) -> Response {
    let method = req.uri().path().to_string();
    let response = next.run(req).await;
    // Unary errors surface the status in the response headers; a missing
    // header means the call reached the body/trailer path, i.e. Ok.
    let code = response
        .headers()
        .get("grpc-status")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i32>().ok())
        .map_or(tonic::Code::Ok, tonic::Code::from);
    metrics.observe_rpc(&method, &format!("{code:?}"));
    response
}

/// Builds a Trailers-Only gRPC error response.
fn grpc_error_response(code: tonic::Code, message: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    headers.insert(
        "grpc-status",
        HeaderValue::from_str(&(code as i32).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("2")),
    );
    if let Ok(value) = HeaderValue::from_str(message) {
        headers.insert("grpc-message", value);
    }
    response
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    grpc: Router,
    http: Router,
    mut close_rx: mpsc::Receiver<Option<ServerError>>,
    done_tx: oneshot::Sender<Result<()>>,
) {
    let mut cause: Option<ServerError> = None;
    let mut shutting_down = false;

    let result = loop {
        tokio::select! {
            received = close_rx.recv() => {
                shutting_down = true;
                cause = received.flatten();
                info!("shutdown requested");
                break Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!(peer = %peer_addr, "accepted connection");
                    tokio::spawn(serve_connection(
                        stream,
                        acceptor.clone(),
                        grpc.clone(),
                        http.clone(),
                    ));
                }
                // An accept failure during shutdown is the closing listener,
                // not an error.
                Err(e) if shutting_down => {
                    debug!(error = %e, "accept failed while shutting down");
                    break Ok(());
                }
                Err(e) => break Err(ServerError::Io(e)),
            }
        }
    };

    drop(listener);
    info!("server stopped");

    let outcome = match result {
        Ok(()) => cause.map_or(Ok(()), Err),
        Err(e) => Err(e),
    };
    let _ = done_tx.send(outcome);
}

async fn serve_connection(stream: TcpStream, acceptor: TlsAcceptor, grpc: Router, http: Router) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(tls_stream) => tls_stream,
        Err(e) => {
            debug!(error = %e, "tls handshake failed");
            return;
        }
    };

    let peer = PeerCerts(Arc::new(
        tls_stream
            .get_ref()
            .1
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
            .unwrap_or_default(),
    ));

    let service = TowerToHyperService::new(ConnRouter { grpc, http, peer });
    let builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
    if let Err(e) = builder
        .serve_connection(TokioIo::new(tls_stream), service)
        .await
    {
        warn!(error = %e, "connection error");
    }
}
