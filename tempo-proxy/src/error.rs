//! Error types for the proxy.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tempo_core::ClusterError;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for startup and lifecycle operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors that stop the proxy from starting.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// IO error while binding or reading TLS material.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The node list could not form a cluster.
    #[error("invalid cluster: {0}")]
    Cluster(#[from] ClusterError),

    /// rustls rejected the certificate, key, or protocol setup.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The key file held no private key.
    #[error("no private key found in '{0}'")]
    MissingPrivateKey(PathBuf),

    /// The certificate file held no certificate.
    #[error("no certificate found in '{0}'")]
    MissingCertificate(PathBuf),

    /// The upstream HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Reasons a single upstream exchange failed.
///
/// These never escape a connection handler. They are logged and turned into a
/// gateway timeout for the client.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Dialing the node failed.
    #[error("failed to connect to node: {0}")]
    Connect(#[source] io::Error),

    /// The node did not answer within the node timeout.
    #[error("node timed out after {0:?}")]
    Timeout(Duration),

    /// Reading from or writing to the node failed.
    #[error("node IO error: {0}")]
    Node(#[source] io::Error),

    /// Writing to the client failed.
    #[error("client IO error: {0}")]
    Client(#[source] io::Error),

    /// The node closed the connection without sending anything.
    #[error("node closed the connection without responding")]
    EmptyResponse,

    /// The node address has no usable TLS server name.
    #[error("invalid TLS server name '{0}'")]
    ServerName(String),

    /// The request could not be rebuilt for the node.
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),

    /// HTTP protocol error from the hand-driven client connection.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Error from the pooled HTTP client.
    #[error("HTTP client error: {0}")]
    Request(#[from] reqwest::Error),
}

impl ExchangeError {
    /// Whether the failure was the node timeout expiring.
    pub fn is_timeout(&self) -> bool {
        match self {
            ExchangeError::Timeout(_) => true,
            ExchangeError::Request(err) => err.is_timeout(),
            _ => false,
        }
    }
}
