//! Outbound HTTP used by proxied replies and the passthrough proxy.

use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use hyper::{HeaderMap, Method, StatusCode};
use tracing::debug;

use crate::headers::strip_hop_by_hop;

static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
static INSECURE_HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn build_client(skip_tls_verify: bool) -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(skip_tls_verify)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Shared client. Timeouts are applied per request.
pub(crate) fn http_client(skip_tls_verify: bool) -> &'static reqwest::Client {
    if skip_tls_verify {
        INSECURE_HTTP_CLIENT.get_or_init(|| build_client(true))
    } else {
        HTTP_CLIENT.get_or_init(|| build_client(false))
    }
}

/// Response received from an upstream, hop-by-hop headers removed.
#[derive(Debug, Clone)]
pub(crate) struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug)]
pub(crate) enum UpstreamError {
    Timeout,
    Transport(String),
}

/// Send one request upstream. `headers` must already be filtered by the
/// caller apart from hop-by-hop headers, which are always removed.
pub(crate) async fn forward(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    mut headers: HeaderMap,
    body: Bytes,
    timeout: Duration,
) -> Result<UpstreamResponse, UpstreamError> {
    strip_hop_by_hop(&mut headers);
    headers.remove(hyper::header::HOST);
    headers.remove(hyper::header::CONTENT_LENGTH);

    debug!(method = %method, url = %url, "Forwarding request upstream");

    let response = client
        .request(method, url)
        .headers(headers)
        .body(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(classify)?;

    let status = response.status();
    let mut headers = response.headers().clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(hyper::header::CONTENT_LENGTH);
    let body = response.bytes().await.map_err(classify)?;

    Ok(UpstreamResponse {
        status,
        headers,
        body,
    })
}

fn classify(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Transport(e.to_string())
    }
}
