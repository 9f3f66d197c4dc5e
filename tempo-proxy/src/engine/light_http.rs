//! HTTP front end with a hand-driven hyper client connection.
//!
//! Each request dials the node, performs one HTTP/1.1 handshake and sends the
//! request over it. Nothing is pooled.

use std::time::Instant;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::client::conn::http1;
use hyper::header::{HeaderValue, HOST};
use hyper::http::request::Parts;
use hyper::http::uri::PathAndQuery;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tempo_core::Node;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::http::{build_response, forward_headers, status_response};
use super::{dial_node, elapsed_ms, Balancer};
use crate::error::ExchangeError;

/// Forwards each request over a fresh hyper client connection.
#[derive(Clone)]
pub struct LightHttpEngine {
    balancer: Balancer,
    connector: TlsConnector,
}

impl LightHttpEngine {
    /// Create the engine.
    pub fn new(balancer: Balancer, connector: TlsConnector) -> Self {
        Self {
            balancer,
            connector,
        }
    }

    /// Proxy one request to the currently selected node.
    pub async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                debug!("failed to read request body: {}", err);
                return status_response(StatusCode::BAD_REQUEST);
            }
        };

        let selector = self.balancer.selector();
        let selection = selector.select_node();
        let Some(node) = self.balancer.node(selection) else {
            return status_response(StatusCode::GATEWAY_TIMEOUT);
        };

        let node_timeout = self.balancer.node_timeout();
        let started = Instant::now();
        let result = match timeout(node_timeout, self.forward(node, &parts, body)).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::Timeout(node_timeout)),
        };
        selector.record_outcome(elapsed_ms(started), selection);

        result.unwrap_or_else(|err| {
            debug!(
                node = %node.address,
                timeout = err.is_timeout(),
                "upstream exchange failed: {}",
                err
            );
            status_response(StatusCode::GATEWAY_TIMEOUT)
        })
    }

    async fn forward(
        &self,
        node: &Node,
        parts: &Parts,
        body: Bytes,
    ) -> Result<Response<Full<Bytes>>, ExchangeError> {
        let stream = dial_node(node, &self.connector).await?;
        let (mut sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!("node connection error: {:?}", err);
            }
        });

        let request = origin_request(node, parts, body)?;
        let response = sender.send_request(request).await?;

        let (response_parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(build_response(
            response_parts.status,
            forward_headers(&response_parts.headers, false),
            body,
        ))
    }
}

/// Rebuild the inbound request in origin form, addressed to `node`.
fn origin_request(
    node: &Node,
    parts: &Parts,
    body: Bytes,
) -> Result<Request<Full<Bytes>>, ExchangeError> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    let host = HeaderValue::from_str(&node.address)
        .map_err(|err| ExchangeError::InvalidRequest(err.to_string()))?;

    let mut request = Request::new(Full::new(body));
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = Uri::from(path_and_query);
    *request.headers_mut() = forward_headers(&parts.headers, true);
    request.headers_mut().insert(HOST, host);
    Ok(request)
}
