//! Raw byte relay.
//!
//! Copies the client's bytes to the selected node and the node's bytes back,
//! without looking at them. A read shorter than [`CHUNK_SIZE`] is taken to mean
//! the sender is done; a message that is an exact multiple of the chunk size,
//! or a node that trickles its answer in small pieces, will be cut short or
//! wait on the client. Only the wait for the first response chunk is bounded by
//! the node timeout.

use std::net::SocketAddr;
use std::time::Instant;

use tempo_core::Node;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::{dial_node, elapsed_ms, Balancer};
use crate::error::ExchangeError;

/// Bytes moved per read.
pub const CHUNK_SIZE: usize = 512;

/// Written to the client when the node produced nothing at all.
pub const GATEWAY_TIMEOUT_RESPONSE: &[u8] = b"HTTP/1.1 504 Gateway Timeout\r\n\r\n";

/// How far a relay got before it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    /// Bytes forwarded from the client to the node.
    pub bytes_to_node: u64,
    /// Whether at least one read from the node succeeded.
    pub response_started: bool,
    /// Bytes written back to the client.
    pub bytes_to_client: u64,
}

impl RelayReport {
    /// Whether the client should receive the gateway timeout line.
    pub fn needs_timeout_response(&self) -> bool {
        !self.response_started && self.bytes_to_client == 0
    }
}

/// Proxies raw connections to the currently selected node.
#[derive(Clone)]
pub struct RelayEngine {
    balancer: Balancer,
    connector: TlsConnector,
}

impl RelayEngine {
    /// Create a relay engine.
    pub fn new(balancer: Balancer, connector: TlsConnector) -> Self {
        Self {
            balancer,
            connector,
        }
    }

    /// Relay one client connection and close it.
    pub async fn relay<S>(&self, mut client: S, peer: SocketAddr) -> RelayReport
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let selector = self.balancer.selector();
        let selection = selector.select_node();
        let mut report = RelayReport::default();

        let started = Instant::now();
        let result = match self.balancer.node(selection) {
            Some(node) => {
                debug!(%peer, node = %node.address, "relaying connection");
                self.exchange(&mut client, node, &mut report).await
            }
            None => Err(ExchangeError::InvalidRequest(format!(
                "no node at index {}",
                selection.node_index
            ))),
        };
        selector.record_outcome(elapsed_ms(started), selection);

        if let Err(err) = result {
            debug!(%peer, timeout = err.is_timeout(), "relay ended early: {}", err);
        }

        if report.needs_timeout_response() {
            let _ = client.write_all(GATEWAY_TIMEOUT_RESPONSE).await;
        }
        let _ = client.shutdown().await;

        report
    }

    async fn exchange<S>(
        &self,
        client: &mut S,
        node: &Node,
        report: &mut RelayReport,
    ) -> Result<(), ExchangeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let node_timeout = self.balancer.node_timeout();

        let mut upstream = match timeout(node_timeout, dial_node(node, &self.connector)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(ExchangeError::Timeout(node_timeout)),
        };

        let mut buf = vec![0u8; CHUNK_SIZE];

        // Forwarding phase.
        loop {
            let read = match client.read(&mut buf).await {
                Ok(read) => read,
                Err(err) => {
                    debug!("client read failed: {}", err);
                    break;
                }
            };

            // A node may answer before taking the whole request; it still gets read.
            if read > 0 {
                match timeout(node_timeout, upstream.write_all(&buf[..read])).await {
                    Ok(Ok(())) => report.bytes_to_node += read as u64,
                    Ok(Err(err)) => {
                        debug!("node write failed: {}", err);
                        break;
                    }
                    Err(_) => {
                        debug!("node write timed out after {:?}", node_timeout);
                        break;
                    }
                }
            }

            if read < CHUNK_SIZE {
                break;
            }
        }

        // Response phase. Only the first read carries a deadline.
        let mut deadline = Some(node_timeout);
        loop {
            let read = match deadline {
                Some(limit) => match timeout(limit, upstream.read(&mut buf)).await {
                    Ok(read) => read,
                    Err(_) => return Err(ExchangeError::Timeout(limit)),
                },
                None => upstream.read(&mut buf).await,
            };

            let read = match read {
                Ok(0) if !report.response_started => return Err(ExchangeError::EmptyResponse),
                Ok(read) => read,
                Err(err) => return Err(ExchangeError::Node(err)),
            };

            deadline = None;
            report.response_started = true;

            if read > 0 {
                client
                    .write_all(&buf[..read])
                    .await
                    .map_err(ExchangeError::Client)?;
                report.bytes_to_client += read as u64;
            }

            if read < CHUNK_SIZE {
                return Ok(());
            }
        }
    }
}
