//! Tempo Proxy Engine
//!
//! Tokio transports that route each connection to the node with the lowest
//! observed average latency: a raw byte relay and two thin HTTP proxies, plus
//! the configuration, TLS and listener plumbing around them.

pub mod config;
pub mod engine;
pub mod error;
pub mod server;
pub mod tls;

pub use config::{ConfigError, EngineKind, ProxyConfig};
pub use error::{ExchangeError, ProxyError, ProxyResult};
pub use server::Server;
