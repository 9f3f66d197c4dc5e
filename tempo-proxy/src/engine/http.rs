//! HTTP front end forwarding through a reqwest client.
//!
//! Also hosts the hyper plumbing shared with the
//! [`LightHttpEngine`](super::LightHttpEngine).

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderMap, HeaderName};
use hyper::http::request::Parts;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tempo_core::Node;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::debug;

use super::{elapsed_ms, Balancer};
use crate::error::{ExchangeError, ProxyResult};

/// Serves HTTP/1.1 on `stream`, answering every request with `handler`.
pub(crate) async fn serve_http1<S, F, Fut>(stream: S, peer: SocketAddr, handler: F)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: Fn(Request<Incoming>) -> Fut + Send + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let service = service_fn(move |req| {
        let response = handler(req);
        async move { Ok::<_, Infallible>(response.await) }
    });

    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(%peer, "error serving connection: {:?}", err);
    }
}

/// An empty response with the given status.
pub fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Headers that describe a single connection and must not be forwarded.
///
/// `content-length` is dropped as well; the outgoing body sets its own.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "transfer-encoding"
            | "te"
            | "trailer"
            | "upgrade"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "content-length"
    )
}

/// Copy end-to-end headers, optionally dropping `Host`.
pub fn forward_headers(source: &HeaderMap, drop_host: bool) -> HeaderMap {
    source
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .filter(|(name, _)| !(drop_host && name.as_str() == "host"))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Absolute URL of `uri`'s path and query on `node`.
pub fn upstream_url(node: &Node, uri: &Uri) -> String {
    let scheme = if node.requires_tls { "https" } else { "http" };
    match uri.query() {
        Some(query) => format!("{}://{}{}?{}", scheme, node.address, uri.path(), query),
        None => format!("{}://{}{}", scheme, node.address, uri.path()),
    }
}

/// Assemble the response handed back to the client.
pub(crate) fn build_response(
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Forwards each request through a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    balancer: Balancer,
    client: reqwest::Client,
}

impl HttpEngine {
    /// Create the engine and its upstream client.
    ///
    /// Idle upstream connections are not kept; every exchange dials afresh.
    pub fn new(balancer: Balancer) -> ProxyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(balancer.node_timeout())
            .pool_max_idle_per_host(0)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { balancer, client })
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
        let upstream = self
            .client
            .request(parts.method.clone(), upstream_url(node, &parts.uri))
            .headers(forward_headers(&parts.headers, true))
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let headers = forward_headers(upstream.headers(), false);
        let body = upstream.bytes().await?;

        Ok(build_response(status, headers, body))
    }
}
