//! Startup configuration read from environment variables.
//!
//! | Variable             | Example                                      |
//! |----------------------|----------------------------------------------|
//! | `NODES`              | `[{"node":"10.0.0.1:80","is_tls":false}]`    |
//! | `SELECT_NODE_PERIOD` | `3`                                          |
//! | `CLEAN_STATS_PERIOD` | `2`                                          |
//! | `NODE_TIMEOUT`       | `3000` (milliseconds)                        |
//! | `HOST_PORT`          | `0.0.0.0:8080`                               |
//! | `ENGINE`             | `THUNDER`, `FAST_HTTP` or `STANDARD_HTTP`    |
//! | `TLS`                | `ON` or `OFF`                                |
//! | `TLS_CERT`/`TLS_KEY` | PEM paths, required when `TLS=ON`            |

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tempo_core::{ClusterResult, ClusterState, Node, SelectionPolicy};
use thiserror::Error;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required variable {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be used.
    #[error("invalid value for {var}: {message}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// `NODES` is not a JSON node list.
    #[error("check the NODES variable, can't parse current input: {0}")]
    Nodes(#[from] serde_json::Error),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// One backend entry of the `NODES` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeConfig {
    /// `host:port` of the node.
    #[serde(rename = "node")]
    pub address: String,
    /// Whether the node must be reached over TLS.
    #[serde(rename = "is_tls", default)]
    pub is_tls: bool,
}

/// Which transport serves inbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Raw byte relay (`THUNDER`).
    Relay,
    /// Hyper front end with a per-request hyper client connection (`FAST_HTTP`).
    LightHttp,
    /// Hyper front end forwarding through a shared reqwest client (`STANDARD_HTTP`).
    Http,
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "THUNDER" => Ok(Self::Relay),
            "FAST_HTTP" => Ok(Self::LightHttp),
            "STANDARD_HTTP" => Ok(Self::Http),
            other => Err(ConfigError::Invalid {
                var: "ENGINE",
                message: format!("expected THUNDER, FAST_HTTP or STANDARD_HTTP, got '{other}'"),
            }),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Relay => write!(f, "THUNDER"),
            EngineKind::LightHttp => write!(f, "FAST_HTTP"),
            EngineKind::Http => write!(f, "STANDARD_HTTP"),
        }
    }
}

/// Certificate and key used to terminate client TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM certificate chain.
    pub cert_path: PathBuf,
    /// PEM private key.
    pub key_path: PathBuf,
}

/// Everything the proxy needs to start serving.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Backend nodes, in selection order.
    pub nodes: Vec<NodeConfig>,
    /// Selection window and cleaning period.
    pub policy: SelectionPolicy,
    /// Bound on every upstream exchange.
    pub node_timeout: Duration,
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Active transport.
    pub engine: EngineKind,
    /// Client-facing TLS, when enabled.
    pub tls: Option<TlsConfig>,
}

impl ProxyConfig {
    /// Load the configuration from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let nodes: Vec<NodeConfig> = serde_json::from_str(&required(&lookup, "NODES")?)?;
        if nodes.is_empty() {
            return Err(ConfigError::Invalid {
                var: "NODES",
                message: "at least one node is required".to_string(),
            });
        }

        let policy = SelectionPolicy {
            selection_period: positive(&lookup, "SELECT_NODE_PERIOD")?,
            cleaning_period: positive(&lookup, "CLEAN_STATS_PERIOD")?,
        };

        let tls = match required(&lookup, "TLS")?.as_str() {
            "ON" => Some(TlsConfig {
                cert_path: required(&lookup, "TLS_CERT")?.into(),
                key_path: required(&lookup, "TLS_KEY")?.into(),
            }),
            "OFF" => None,
            other => {
                return Err(ConfigError::Invalid {
                    var: "TLS",
                    message: format!("expected ON or OFF, got '{other}'"),
                })
            }
        };

        Ok(Self {
            nodes,
            policy,
            node_timeout: Duration::from_millis(parsed(&lookup, "NODE_TIMEOUT")?),
            listen_addr: parsed(&lookup, "HOST_PORT")?,
            engine: required(&lookup, "ENGINE")?.parse()?,
            tls,
        })
    }

    /// Build the shared cluster state from the node list.
    pub fn build_cluster(&self) -> ClusterResult<ClusterState> {
        let nodes = self
            .nodes
            .iter()
            .map(|node| Node::new(node.address.clone(), node.is_tls))
            .collect();
        ClusterState::new(nodes)
    }
}

fn required<F>(lookup: &F, var: &'static str) -> ConfigResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(var)),
    }
}

fn parsed<F, T>(lookup: &F, var: &'static str) -> ConfigResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    required(lookup, var)?
        .trim()
        .parse()
        .map_err(|err: T::Err| ConfigError::Invalid {
            var,
            message: err.to_string(),
        })
}

fn positive<F>(lookup: &F, var: &'static str) -> ConfigResult<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match parsed(lookup, var)? {
        0 => Err(ConfigError::Invalid {
            var,
            message: "must be at least 1".to_string(),
        }),
        value => Ok(value),
    }
}
