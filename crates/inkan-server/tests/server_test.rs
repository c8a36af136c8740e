//! End-to-end tests over a real TLS listener.

use std::time::Duration;

use chrono::Utc;
use inkan_proto::certificate_service_client::CertificateServiceClient;
use inkan_proto::hello_service_client::HelloServiceClient;
use inkan_proto::{IssueCertificateRequest, KeyUsages, ListCertificatesRequest, Subject};
use inkan_server::{ServeConfig, Server, ServerError};
use inkan_storage::Storage;
use tonic::metadata::MetadataValue;
use tonic::transport::{Certificate as TonicCertificate, Channel, ClientTlsConfig, Identity};
use tonic::{Code, Request};

const TOKEN: &str = "test-bootstrap-token";

struct TestServer {
    server: Option<Server>,
    ca_pem: String,
    port: u16,
    _dir: tempfile::TempDir,
}

async fn start_server(configure: impl FnOnce(ServeConfig) -> ServeConfig) -> TestServer {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(dir.path());

    let cfg = configure(
        ServeConfig::new("127.0.0.1:0".parse().unwrap()).with_bootstrap_token(TOKEN),
    );
    let server = Server::start(storage.clone(), cfg).await.unwrap();
    let port = server.local_addr().port();

    let ca_pem = storage
        .profile(inkan_server::AUTH_PROFILE)
        .unwrap()
        .read_ca_cert()
        .unwrap()
        .pem();

    TestServer {
        server: Some(server),
        ca_pem,
        port,
        _dir: dir,
    }
}

impl TestServer {
    async fn channel(&self) -> Channel {
        self.channel_with_identity(None).await
    }

    async fn channel_with_identity(&self, identity: Option<Identity>) -> Channel {
        let mut tls = ClientTlsConfig::new()
            .ca_certificate(TonicCertificate::from_pem(&self.ca_pem))
            .domain_name("localhost");
        if let Some(identity) = identity {
            tls = tls.identity(identity);
        }
        Channel::from_shared(format!("https://localhost:{}", self.port))
            .unwrap()
            .tls_config(tls)
            .unwrap()
            .connect()
            .await
            .unwrap()
    }

    async fn shutdown(mut self) {
        if let Some(server) = self.server.take() {
            server.close(None).await.unwrap();
        }
    }
}

fn bearer(token: &str) -> MetadataValue<tonic::metadata::Ascii> {
    format!("bearer {token}").parse().unwrap()
}

fn enroll_request(cn: &str, csr_pem: String) -> IssueCertificateRequest {
    let now = Utc::now();
    IssueCertificateRequest {
        profile: inkan_server::AUTH_PROFILE.to_string(),
        subject: Some(Subject {
            common_name: cn.to_string(),
            ..Subject::default()
        }),
        names: vec![format!("{cn}.example")],
        key_usages: Some(KeyUsages {
            preset: "tlsClient".to_string(),
            ..KeyUsages::default()
        }),
        not_before: now.timestamp(),
        not_after: (now + chrono::Duration::days(30)).timestamp(),
        csr_pem,
    }
}

#[tokio::test]
async fn bootstrap_enrollment_round_trip() {
    let ts = start_server(|cfg| cfg).await;

    let key_pair = inkan_pki::KeyType::EcdsaP256.generate().unwrap();
    let csr = inkan_ca::csr_for_key(&key_pair).unwrap();

    let token = bearer(TOKEN);
    let channel = ts.channel().await;
    let mut client =
        CertificateServiceClient::with_interceptor(channel, move |mut req: Request<()>| {
            req.metadata_mut().insert("authorization", token.clone());
            Ok(req)
        });

    let response = client
        .bootstrap_enroll(enroll_request("node-1", csr))
        .await
        .unwrap()
        .into_inner();
    assert!(response.serial > 0);

    let leaf = inkan_pki::Certificate::from_pem(&response.certificate_pem).unwrap();
    let ca = inkan_pki::Certificate::from_pem(&response.chain_pem).unwrap();
    assert_eq!(leaf.subject(), "node-1");
    inkan_pki::validate_against_ca(
        &leaf,
        &ca,
        Utc::now(),
        Some(inkan_pki::ExtKeyUsage::ClientAuth),
    )
    .unwrap();

    // The enrolled certificate authenticates follow-up calls over mTLS.
    let identity = Identity::from_pem(&response.certificate_pem, key_pair.serialize_pem());
    let channel = ts.channel_with_identity(Some(identity)).await;
    let mut client = CertificateServiceClient::new(channel);
    let listed = client
        .list_certificates(ListCertificatesRequest {
            profile: inkan_server::AUTH_PROFILE.to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    // Server certificate plus the freshly enrolled one.
    assert_eq!(listed.entries.len(), 2);

    ts.shutdown().await;
}

#[tokio::test]
async fn wrong_token_is_unauthenticated() {
    let ts = start_server(|cfg| cfg).await;

    let key_pair = inkan_pki::KeyType::EcdsaP256.generate().unwrap();
    let csr = inkan_ca::csr_for_key(&key_pair).unwrap();

    let token = bearer("not-the-token");
    let channel = ts.channel().await;
    let mut client =
        CertificateServiceClient::with_interceptor(channel, move |mut req: Request<()>| {
            req.metadata_mut().insert("authorization", token.clone());
            Ok(req)
        });

    let err = client
        .bootstrap_enroll(enroll_request("node-1", csr))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);

    ts.shutdown().await;
}

#[tokio::test]
async fn anonymous_issuance_is_denied_but_hello_works() {
    let ts = start_server(|cfg| cfg).await;
    let channel = ts.channel().await;

    let mut hello = HelloServiceClient::new(channel.clone());
    let response = hello
        .hello(inkan_proto::HelloRequest {})
        .await
        .unwrap()
        .into_inner();
    assert!(response.build.starts_with("inkan "));

    let key_pair = inkan_pki::KeyType::EcdsaP256.generate().unwrap();
    let csr = inkan_ca::csr_for_key(&key_pair).unwrap();
    let mut certs = CertificateServiceClient::new(channel);
    let err = certs
        .issue_certificate(enroll_request("alice", csr))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::PermissionDenied);

    ts.shutdown().await;
}

#[tokio::test]
async fn bootstrap_token_cannot_request_server_cert() {
    let ts = start_server(|cfg| cfg).await;

    let key_pair = inkan_pki::KeyType::EcdsaP256.generate().unwrap();
    let csr = inkan_ca::csr_for_key(&key_pair).unwrap();
    let mut request = enroll_request("node-1", csr);
    request.key_usages = Some(KeyUsages {
        preset: "tlsServer".to_string(),
        ..KeyUsages::default()
    });

    let token = bearer(TOKEN);
    let channel = ts.channel().await;
    let mut client =
        CertificateServiceClient::with_interceptor(channel, move |mut req: Request<()>| {
            req.metadata_mut().insert("authorization", token.clone());
            Ok(req)
        });

    let err = client.bootstrap_enroll(request).await.unwrap_err();
    assert_eq!(err.code(), Code::PermissionDenied);

    ts.shutdown().await;
}

#[tokio::test]
async fn healthz_and_rpc_share_one_port() {
    let ts = start_server(|cfg| cfg).await;

    // Plain HTTP/2 GET on the same TLS port.
    let tcp = tokio::net::TcpStream::connect(("127.0.0.1", ts.port))
        .await
        .unwrap();
    let tls = tls_connector(&ts.ca_pem)
        .connect(
            rustls_pki_types::ServerName::try_from("localhost").unwrap(),
            tcp,
        )
        .await
        .unwrap();
    let (h2, connection) = h2::client::handshake(tls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    let mut h2 = h2.ready().await.unwrap();

    let request = http::Request::builder()
        .method("GET")
        .uri(format!("https://localhost:{}/healthz", ts.port))
        .body(())
        .unwrap();
    let (response, _) = h2.send_request(request, true).unwrap();
    let response = response.await.unwrap();
    assert_eq!(response.status(), http::StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));

    let mut body = response.into_body();
    let mut collected = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.unwrap();
        let _ = body.flow_control().release_capacity(chunk.len());
        collected.extend_from_slice(&chunk);
    }
    assert_eq!(collected, b"ok\n");

    // An RPC on the same port still reaches the RPC router.
    let channel = ts.channel().await;
    let mut hello = HelloServiceClient::new(channel);
    assert!(hello.hello(inkan_proto::HelloRequest {}).await.is_ok());

    ts.shutdown().await;
}

#[tokio::test]
async fn close_resolves_wait_with_the_cause() {
    let mut ts = start_server(|cfg| cfg).await;
    let server = ts.server.take().unwrap();

    let err = server
        .close(Some(ServerError::Shutdown("maintenance".into())))
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Shutdown(_)));
}

#[tokio::test]
async fn auto_shutdown_closes_the_server() {
    let mut ts = start_server(|cfg| cfg.with_auto_shutdown(Duration::from_millis(200))).await;
    let server = ts.server.take().unwrap();
    tokio::time::timeout(Duration::from_secs(5), server.wait())
        .await
        .expect("auto-shutdown did not fire")
        .unwrap();
}

fn tls_connector(ca_pem: &str) -> tokio_rustls::TlsConnector {
    let ca = inkan_pki::Certificate::from_pem(ca_pem).unwrap();
    let mut roots = rustls::RootCertStore::empty();
    roots
        .add(rustls_pki_types::CertificateDer::from(ca.der().to_vec()))
        .unwrap();
    let mut config = rustls::ClientConfig::builder_with_provider(std::sync::Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec()];
    tokio_rustls::TlsConnector::from(std::sync::Arc::new(config))
}
