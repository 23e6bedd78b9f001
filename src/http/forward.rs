//! Request forwarding to the chosen downstream destination.
//!
//! # Responsibilities
//! - Send the original body bytes downstream, byte-identical
//! - Copy request headers onto the outbound request
//! - Relay the downstream status, headers, and body stream verbatim
//!
//! # Design Decisions
//! - `Forward` is a trait so tests can record and stub the downstream
//!   exchange instead of opening sockets
//! - The client pools connections with bounded idle count, idle
//!   timeout, and connect/TLS timeout: path identifiers influence the
//!   destination set, so unbounded pooling is an exhaustion vector
//! - The response body is streamed through, never buffered or
//!   re-serialized

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Response};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::schema::{ForwarderConfig, TimeoutConfig};

/// Request-time forwarding failure. Surfaced to the caller as an
/// internal error; never retried.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to build outbound client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("failed to send request downstream: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("failed to build relayed response: {0}")]
    Relay(#[source] axum::http::Error),
}

/// The forwarding seam between the dispatch handler and the network.
#[async_trait]
pub trait Forward: Send + Sync {
    /// POST the original body to the destination and return the
    /// downstream response, transparently relayed.
    async fn forward(
        &self,
        destination: Url,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<Body>, ForwardError>;
}

/// Production forwarder backed by a pooled HTTP client.
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    pub fn new(config: &ForwarderConfig, timeouts: &TimeoutConfig) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(timeouts.idle_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(ForwardError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Forward for HttpForwarder {
    async fn forward(
        &self,
        destination: Url,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<Body>, ForwardError> {
        let response = self
            .client
            .post(destination)
            .headers(outbound_headers(headers))
            .body(body)
            .send()
            .await
            .map_err(ForwardError::Transport)?;

        let status = response.status();
        let mut builder = Response::builder().status(status);
        if let Some(response_headers) = builder.headers_mut() {
            for (name, value) in response.headers() {
                response_headers.append(name.clone(), value.clone());
            }
        }
        builder
            .body(Body::from_stream(response.bytes_stream()))
            .map_err(ForwardError::Relay)
    }
}

/// Copy of the inbound headers for the outbound request. `host` and
/// `content-length` belong to the transport and are set by the client
/// for the new destination.
fn outbound_headers(headers: &HeaderMap) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }
    outbound
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_outbound_headers_verbatim_minus_transport() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("dispatcher.local"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert("x-custom", HeaderValue::from_static("kept"));
        headers.append("x-custom", HeaderValue::from_static("kept-too"));

        let outbound = outbound_headers(&headers);
        assert!(outbound.get(header::HOST).is_none());
        assert!(outbound.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(
            outbound.get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let customs: Vec<_> = outbound.get_all("x-custom").iter().collect();
        assert_eq!(customs.len(), 2);
    }
}
