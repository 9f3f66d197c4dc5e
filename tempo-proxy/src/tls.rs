//! TLS termination and origination for Tempo.
//!
//! Client connections are terminated with a `rustls::ServerConfig` built from
//! PEM files. Nodes flagged `is_tls` are dialed through a client config rooted
//! at the Mozilla trust store.

use pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::crypto::{ring, CryptoProvider};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::TlsConfig;
use crate::error::{ExchangeError, ProxyError, ProxyResult};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

/// Loads a TLS `ServerConfig` from the given certificate and key paths.
pub fn load_tls_config<P: AsRef<Path>>(
    cert_path: P,
    key_path: P,
) -> ProxyResult<Arc<ServerConfig>> {
    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();

    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(ProxyError::MissingCertificate(cert_path.to_path_buf()));
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| ProxyError::MissingPrivateKey(key_path.to_path_buf()))?;

    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    // Backends are spoken to over HTTP/1.1 only.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Builds the acceptor used to terminate client TLS.
pub fn tls_acceptor(config: &TlsConfig) -> ProxyResult<TlsAcceptor> {
    let server_config = load_tls_config(&config.cert_path, &config.key_path)?;
    Ok(TlsAcceptor::from(server_config))
}

/// Builds the connector used to reach TLS nodes.
pub fn node_connector() -> ProxyResult<TlsConnector> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Derives the TLS server name from a `host:port` node address.
pub fn server_name(address: &str) -> Result<ServerName<'static>, ExchangeError> {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => address,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    ServerName::try_from(host.to_string())
        .map_err(|_| ExchangeError::ServerName(address.to_string()))
}
