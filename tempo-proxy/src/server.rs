//! Listener lifecycle: bind, accept, hand each connection to the engine, stop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempo_core::NodeSelector;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::engine::{Balancer, Engine};
use crate::error::ProxyResult;
use crate::tls;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// A running proxy.
pub struct Server {
    local_addr: SocketAddr,
    selector: NodeSelector,
    shutdown: broadcast::Sender<()>,
    accept_loop: JoinHandle<()>,
}

impl Server {
    /// Builds the cluster, binds the listener and starts accepting connections.
    ///
    /// Returns once the listener is bound; connections are served in the
    /// background until [`stop`](Self::stop) is called.
    pub async fn start(config: ProxyConfig) -> ProxyResult<Self> {
        let cluster = Arc::new(config.build_cluster()?);
        let selector = NodeSelector::new(cluster, config.policy);
        let engine = Engine::new(
            config.engine,
            Balancer::new(selector.clone(), config.node_timeout),
        )?;

        let tls_acceptor = config.tls.as_ref().map(tls::tls_acceptor).transpose()?;

        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            engine = %config.engine,
            nodes = config.nodes.len(),
            tls = tls_acceptor.is_some(),
            "listening"
        );

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let accept_loop = tokio::spawn(accept_loop(listener, engine, tls_acceptor, shutdown_rx));

        Ok(Self {
            local_addr,
            selector,
            shutdown,
            accept_loop,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The selection engine shared by every connection.
    pub fn selector(&self) -> &NodeSelector {
        &self.selector
    }

    /// Closes the listener.
    ///
    /// Connections already being handled keep running to completion.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.accept_loop.await {
            error!("accept loop ended abnormally: {}", err);
        }
        info!(addr = %self.local_addr, "stopped listening");
    }
}

async fn accept_loop(
    listener: TcpListener,
    engine: Engine,
    tls_acceptor: Option<TlsAcceptor>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let engine = engine.clone();
                        let tls_acceptor = tls_acceptor.clone();
                        tokio::spawn(async move {
                            handle_connection(engine, tls_acceptor, stream, peer).await;
                        });
                    }
                    Err(err) => accept_failed(err).await,
                }
            }
            _ = shutdown.recv() => {
                break;
            }
        }
    }
}

async fn accept_failed(err: io::Error) {
    warn!("failed to accept connection: {}", err);
    // EMFILE and friends persist across calls.
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

async fn handle_connection(
    engine: Engine,
    tls_acceptor: Option<TlsAcceptor>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    match tls_acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => engine.serve(tls_stream, peer).await,
            // Plaintext or failed handshakes are turned away without a reply.
            Err(err) => debug!(%peer, "TLS handshake failed: {}", err),
        },
        None => engine.serve(stream, peer).await,
    }
}
