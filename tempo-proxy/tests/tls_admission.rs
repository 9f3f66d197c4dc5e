//! Client TLS termination in front of the relay.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pki_types::{CertificateDer, ServerName};
use rustls::crypto::ring;
use rustls::{ClientConfig, RootCertStore};
use tempo_core::SelectionPolicy;
use tempo_proxy::config::{NodeConfig, TlsConfig};
use tempo_proxy::{EngineKind, ProxyConfig, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;

struct Identity {
    tls: TlsConfig,
    cert: CertificateDer<'static>,
}

/// Writes a fresh self-signed `localhost` certificate and key to disk.
fn identity(name: &str) -> Identity {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let dir = std::env::temp_dir();
    let prefix = format!("tempo-admission-{}-{}", std::process::id(), name);
    let cert_path: PathBuf = dir.join(format!("{prefix}-cert.pem"));
    let key_path: PathBuf = dir.join(format!("{prefix}-key.pem"));
    std::fs::write(&cert_path, generated.cert.pem()).unwrap();
    std::fs::write(&key_path, generated.key_pair.serialize_pem()).unwrap();

    Identity {
        tls: TlsConfig {
            cert_path,
            key_path,
        },
        cert: CertificateDer::from(generated.cert.der().to_vec()),
    }
}

/// A node answering `PONG` to anything, counting the connections it sees.
async fn spawn_node(accepted: Arc<AtomicUsize>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 512];
                if socket.read(&mut buf).await.is_err() {
                    return;
                }
                let _ = socket.write_all(b"PONG\r\n").await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

async fn start_relay(node: SocketAddr, tls: TlsConfig) -> Server {
    let config = ProxyConfig {
        nodes: vec![NodeConfig {
            address: node.to_string(),
            is_tls: false,
        }],
        policy: SelectionPolicy {
            selection_period: 10,
            cleaning_period: 10,
        },
        node_timeout: Duration::from_secs(2),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        engine: EngineKind::Relay,
        tls: Some(tls),
    };
    Server::start(config).await.unwrap()
}

#[tokio::test]
async fn test_plaintext_client_is_dropped_without_reply() {
    let accepted = Arc::new(AtomicUsize::new(0));
    let node = spawn_node(accepted.clone()).await;
    let server = start_relay(node, identity("plaintext").tls).await;

    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    // A TLS alert may precede the close; a reset is also acceptable.
    let mut received = Vec::new();
    let read = stream.read_to_end(&mut received);
    let closed = tokio::time::timeout(Duration::from_secs(5), read).await;
    assert!(closed.is_ok(), "connection left open");
    assert!(!received.windows(4).any(|window| window == b"HTTP"));

    assert_eq!(accepted.load(Ordering::SeqCst), 0);
    let stats = server.selector().cluster().snapshot();
    assert_eq!(stats[0].request_count, 1);

    server.stop().await;
}

#[tokio::test]
async fn test_tls_client_is_relayed() {
    let accepted = Arc::new(AtomicUsize::new(0));
    let node = spawn_node(accepted.clone()).await;
    let identity = identity("relayed");
    let server = start_relay(node, identity.tls).await;

    let mut roots = RootCertStore::empty();
    roots.add(identity.cert).unwrap();
    let client_config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));

    let tcp = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut stream = connector
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
        .unwrap();
    stream.write_all(b"PING\r\n").await.unwrap();
    stream.flush().await.unwrap();

    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();

    assert_eq!(received, b"PONG\r\n");
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    server.stop().await;
}
