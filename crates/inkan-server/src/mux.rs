//! Protocol multiplexer for the shared listener.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::response::Response;
use axum::Router;
use futures::future::BoxFuture;
use http::{header::CONTENT_TYPE, Request, Version};
use rustls_pki_types::CertificateDer;
use tower::Service;

/// The TLS peer chain of a connection, attached to every request on it.
#[derive(Debug, Clone, Default)]
pub(crate) struct PeerCerts(pub Arc<Vec<CertificateDer<'static>>>);

/// Routes each request on one connection: HTTP/2 requests whose content type
/// starts with `application/grpc` go to the RPC router, everything else to
/// the HTTP router. The connection's peer chain rides along as a request
/// extension.
#[derive(Clone)]
pub(crate) struct ConnRouter {
    pub grpc: Router,
    pub http: Router,
    pub peer: PeerCerts,
}

impl Service<Request<hyper::body::Incoming>> for ConnRouter {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        let mut req = req.map(Body::new);
        req.extensions_mut().insert(self.peer.clone());

        let is_grpc = req.version() == Version::HTTP_2
            && req
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("application/grpc"));

        let mut router = if is_grpc {
            self.grpc.clone()
        } else {
            self.http.clone()
        };
        Box::pin(async move { router.call(req).await })
    }
}
