//! Passthrough for requests no mock matched, and CONNECT tunneling.

use std::time::Duration;

use bytes::Bytes;
use hyper::body::Incoming;
use hyper::http::request::Parts;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::response::{diagnostic_response, empty_body, stub_to_response, MockBody};
use crate::config::PassthroughConfig;
use crate::headers::{MochaHeadersExt, VALUE_PROXY, VALUE_TRUE, X_MOCHA_ERROR, X_MOCHA_PROXIED};
use crate::reply::ResponseStub;
use crate::upstream::{self, UpstreamError};

pub(crate) struct Passthrough {
    target: String,
    timeout: Duration,
    skip_tls_verify: bool,
    tunnel_connect: bool,
}

/// Result of a forward: the response to send and, when the upstream
/// answered, the stub to record.
pub(crate) struct Forwarded {
    pub response: Response<MockBody>,
    pub stub: Option<ResponseStub>,
}

impl Passthrough {
    pub(crate) fn new(config: &PassthroughConfig) -> Self {
        Self {
            target: config.target.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(config.timeout_ms),
            skip_tls_verify: config.skip_tls_verify,
            tunnel_connect: config.tunnel_connect,
        }
    }

    pub(crate) fn tunnels_connect(&self) -> bool {
        self.tunnel_connect
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    fn upstream_url(&self, parts: &Parts) -> String {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{}{}", self.target, path_and_query)
    }

    /// Forward the request upstream. Failures become 502 (504 on timeout).
    pub(crate) async fn forward(&self, parts: &Parts, body: Bytes) -> Forwarded {
        let url = self.upstream_url(parts);
        let client = upstream::http_client(self.skip_tls_verify);
        let result = upstream::forward(
            client,
            parts.method.clone(),
            &url,
            parts.headers.clone(),
            body,
            self.timeout,
        )
        .await;

        match result {
            Ok(upstream) => {
                let mut stub = ResponseStub::new(upstream.status).with_body(upstream.body);
                stub.headers = upstream.headers;
                let mut response = stub_to_response(&stub);
                response.set_header(&X_MOCHA_PROXIED, &VALUE_TRUE);
                Forwarded {
                    response,
                    stub: Some(stub),
                }
            }
            Err(UpstreamError::Timeout) => {
                warn!(url = %url, timeout_ms = self.timeout.as_millis() as u64, "Passthrough timed out");
                Forwarded {
                    response: diagnostic_response(
                        StatusCode::GATEWAY_TIMEOUT,
                        &VALUE_PROXY,
                        format!(
                            "PROXY ERROR\nupstream {url} did not answer within {}ms\n",
                            self.timeout.as_millis()
                        ),
                    ),
                    stub: None,
                }
            }
            Err(UpstreamError::Transport(message)) => {
                warn!(url = %url, error = %message, "Passthrough failed");
                Forwarded {
                    response: diagnostic_response(
                        StatusCode::BAD_GATEWAY,
                        &VALUE_PROXY,
                        format!("PROXY ERROR\n{url}: {message}\n"),
                    ),
                    stub: None,
                }
            }
        }
    }
}

/// Answer a CONNECT by dialing its authority and splicing the upgraded
/// client connection to it.
pub(crate) async fn tunnel(req: Request<Incoming>, timeout: Duration) -> Response<MockBody> {
    let Some(authority) = req.uri().authority().map(|a| a.to_string()) else {
        return diagnostic_response(
            StatusCode::BAD_REQUEST,
            &VALUE_PROXY,
            "CONNECT requires host:port\n".to_string(),
        );
    };

    let upstream = match tokio::time::timeout(timeout, TcpStream::connect(&authority)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(authority = %authority, error = %e, "CONNECT dial failed");
            return diagnostic_response(
                StatusCode::BAD_GATEWAY,
                &VALUE_PROXY,
                format!("PROXY ERROR\n{authority}: {e}\n"),
            );
        }
        Err(_) => {
            warn!(authority = %authority, "CONNECT dial timed out");
            return diagnostic_response(
                StatusCode::GATEWAY_TIMEOUT,
                &VALUE_PROXY,
                format!("PROXY ERROR\n{authority}: connect timed out\n"),
            );
        }
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let mut client = TokioIo::new(upgraded);
                let mut upstream = upstream;
                match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                    Ok((sent, received)) => {
                        debug!(authority = %authority, sent, received, "Tunnel closed");
                    }
                    Err(e) => debug!(authority = %authority, error = %e, "Tunnel error"),
                }
            }
            Err(e) => warn!(authority = %authority, error = %e, "CONNECT upgrade failed"),
        }
    });

    Response::new(empty_body())
}

pub(crate) fn is_proxy_error(response: &Response<MockBody>) -> bool {
    response
        .headers()
        .get(&X_MOCHA_ERROR)
        .is_some_and(|v| *v == VALUE_PROXY)
}
