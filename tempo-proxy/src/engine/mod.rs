//! Transport engines.
//!
//! Each engine takes an accepted client stream, asks the [`NodeSelector`] for
//! a node, performs one upstream exchange and reports the elapsed time back.
//! The engine is picked once at startup from [`EngineKind`].

pub mod http;
pub mod light_http;
pub mod relay;

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tempo_core::{Node, NodeSelector, Selection};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::EngineKind;
use crate::error::{ExchangeError, ProxyResult};
use crate::tls;

pub use http::HttpEngine;
pub use light_http::LightHttpEngine;
pub use relay::RelayEngine;

/// Selection engine plus the upstream timeout, shared by every handler.
#[derive(Debug, Clone)]
pub struct Balancer {
    selector: NodeSelector,
    node_timeout: Duration,
}

impl Balancer {
    /// Create a balancer.
    pub fn new(selector: NodeSelector, node_timeout: Duration) -> Self {
        Self {
            selector,
            node_timeout,
        }
    }

    /// The node selection engine.
    pub fn selector(&self) -> &NodeSelector {
        &self.selector
    }

    /// Bound on a single upstream exchange.
    pub fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    /// Resolve a selection to its node.
    pub fn node(&self, selection: Selection) -> Option<&Node> {
        self.selector.cluster().node(selection.node_index)
    }
}

/// The configured transport.
#[derive(Clone)]
pub enum Engine {
    /// Raw byte relay.
    Relay(RelayEngine),
    /// Hyper front end with a hand-driven hyper client.
    LightHttp(LightHttpEngine),
    /// Hyper front end with a reqwest client.
    Http(HttpEngine),
}

impl Engine {
    /// Build the engine selected by `kind`.
    pub fn new(kind: EngineKind, balancer: Balancer) -> ProxyResult<Self> {
        Ok(match kind {
            EngineKind::Relay => Engine::Relay(RelayEngine::new(balancer, tls::node_connector()?)),
            EngineKind::LightHttp => {
                Engine::LightHttp(LightHttpEngine::new(balancer, tls::node_connector()?))
            }
            EngineKind::Http => Engine::Http(HttpEngine::new(balancer)?),
        })
    }

    /// Which kind of engine this is.
    pub fn kind(&self) -> EngineKind {
        match self {
            Engine::Relay(_) => EngineKind::Relay,
            Engine::LightHttp(_) => EngineKind::LightHttp,
            Engine::Http(_) => EngineKind::Http,
        }
    }

    /// Handle one accepted (and, if required, TLS-terminated) connection.
    pub async fn serve<S>(&self, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        match self {
            Engine::Relay(engine) => {
                engine.relay(stream, peer).await;
            }
            Engine::LightHttp(engine) => {
                let engine = engine.clone();
                http::serve_http1(stream, peer, move |req| {
                    let engine = engine.clone();
                    async move { engine.handle(req).await }
                })
                .await
            }
            Engine::Http(engine) => {
                let engine = engine.clone();
                http::serve_http1(stream, peer, move |req| {
                    let engine = engine.clone();
                    async move { engine.handle(req).await }
                })
                .await
            }
        }
    }
}

/// A connection to a node, encrypted or not.
pub enum NodeStream {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for NodeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NodeStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            NodeStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NodeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            NodeStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            NodeStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NodeStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            NodeStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NodeStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            NodeStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Open a fresh connection to `node`, wrapping it in TLS when the node asks for it.
///
/// Not bounded by a timeout; callers apply the node timeout.
pub async fn dial_node(node: &Node, connector: &TlsConnector) -> Result<NodeStream, ExchangeError> {
    let stream = TcpStream::connect(node.address.as_str())
        .await
        .map_err(ExchangeError::Connect)?;

    if !node.requires_tls {
        return Ok(NodeStream::Plain(stream));
    }

    let server_name = tls::server_name(&node.address)?;
    let stream = connector
        .connect(server_name, stream)
        .await
        .map_err(ExchangeError::Connect)?;
    Ok(NodeStream::Tls(Box::new(stream)))
}

/// Milliseconds elapsed since `started`, saturating.
pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
