//! TLS termination for `https` bases.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use tcp_tunnel::config::schema::TlsConfig;
use tcp_tunnel::net::tls::load_tls_acceptor;
use tcp_tunnel::net::TcpConnector;

mod common;

use common::{start_http_target, start_tunnel_with, tunnel_config, HTTP_RESPONSE};

const WAIT: Duration = Duration::from_secs(5);

struct Material {
    _dir: tempfile::TempDir,
    config: TlsConfig,
    roots: RootCertStore,
}

fn self_signed() -> Material {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .self_signed(&key_pair)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("cacert.pem");
    let key_path = dir.path().join("privkey.pem");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();

    let mut roots = RootCertStore::empty();
    roots.add(cert.der().clone()).unwrap();

    Material {
        _dir: dir,
        config: TlsConfig {
            cert_path,
            key_path,
        },
        roots,
    }
}

fn client(roots: RootCertStore) -> TlsConnector {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[tokio::test]
async fn https_base_terminates_tls_and_rewrites() {
    let material = self_signed();
    let (target, mut captured) = start_http_target().await;

    let mut config = tunnel_config("https", target);
    config.tls = Some(material.config.clone());
    let acceptor = load_tls_acceptor(&material.config).unwrap();
    let tunnel = start_tunnel_with(config, Some(acceptor), TcpConnector).await;

    let tcp = TcpStream::connect(tunnel.addr).await.unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut stream = timeout(WAIT, client(material.roots).connect(server_name, tcp))
        .await
        .unwrap()
        .unwrap();

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: secure.example.com\r\n\r\n")
        .await
        .unwrap();

    let request = timeout(WAIT, captured.recv()).await.unwrap().unwrap();
    let expected = format!(
        "GET / HTTP/1.1\r\nHost: 127.0.0.1:{}\r\nX-Forwarded-For: 127.0.0.1\r\n\r\n",
        target.port()
    );
    assert_eq!(String::from_utf8(request).unwrap(), expected);

    let mut response = vec![0u8; HTTP_RESPONSE.len()];
    timeout(WAIT, stream.read_exact(&mut response)).await.unwrap().unwrap();
    assert_eq!(response, HTTP_RESPONSE);
}

#[tokio::test]
async fn failed_handshake_does_not_stop_listener() {
    let material = self_signed();
    let (target, _captured) = start_http_target().await;

    let mut config = tunnel_config("https", target);
    config.tls = Some(material.config.clone());
    let acceptor = load_tls_acceptor(&material.config).unwrap();
    let tunnel = start_tunnel_with(config, Some(acceptor), TcpConnector).await;

    // plaintext on a TLS port
    let mut plain = TcpStream::connect(tunnel.addr).await.unwrap();
    plain
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let mut buf = Vec::new();
    let _ = timeout(WAIT, plain.read_to_end(&mut buf)).await.unwrap();

    let tcp = TcpStream::connect(tunnel.addr).await.unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let handshake = timeout(WAIT, client(material.roots).connect(server_name, tcp)).await;
    assert!(handshake.unwrap().is_ok());
}
