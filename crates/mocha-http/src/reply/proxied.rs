//! Reply that forwards the matched request to another server.

use std::time::Duration;

use async_trait::async_trait;
use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;

use super::{Reply, ResponseStub, ResponseWriter};
use crate::error::{MockError, ReplyError};
use crate::mock::BuildContext;
use crate::request::RequestValues;
use crate::upstream::{forward, http_client, UpstreamError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Forwards the request to `target` and relays the upstream response.
///
/// The request path can be trimmed before it is appended to the target, and
/// headers can be added or removed in both directions.
pub struct ProxiedReply {
    target: String,
    timeout: Duration,
    skip_tls_verify: bool,
    trim_prefix: Option<String>,
    trim_suffix: Option<String>,
    proxy_headers: HeaderMap,
    remove_headers: Vec<String>,
    response_headers: HeaderMap,
    invalid: Option<String>,
}

impl ProxiedReply {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            timeout: DEFAULT_TIMEOUT,
            skip_tls_verify: false,
            trim_prefix: None,
            trim_suffix: None,
            proxy_headers: HeaderMap::new(),
            remove_headers: Vec::new(),
            response_headers: HeaderMap::new(),
            invalid: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn skip_tls_verify(mut self) -> Self {
        self.skip_tls_verify = true;
        self
    }

    pub fn trim_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.trim_prefix = Some(prefix.into());
        self
    }

    pub fn trim_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.trim_suffix = Some(suffix.into());
        self
    }

    /// Header added to the upstream request.
    pub fn proxy_header(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value, true);
        self
    }

    /// Header removed from the upstream request.
    pub fn remove_proxy_header(mut self, name: &str) -> Self {
        self.remove_headers.push(name.to_ascii_lowercase());
        self
    }

    /// Header added to the response sent back to the client.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value, false);
        self
    }

    fn insert(&mut self, name: &str, value: &str, upstream: bool) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                let map = if upstream {
                    &mut self.proxy_headers
                } else {
                    &mut self.response_headers
                };
                map.append(name, value);
            }
            _ => {
                if self.invalid.is_none() {
                    self.invalid = Some(format!("invalid header {name}: {value}"));
                }
            }
        }
    }

    fn upstream_url(&self, request: &RequestValues) -> String {
        let mut path = request.path.as_str();
        if let Some(prefix) = &self.trim_prefix {
            path = path.strip_prefix(prefix.as_str()).unwrap_or(path);
        }
        if let Some(suffix) = &self.trim_suffix {
            path = path.strip_suffix(suffix.as_str()).unwrap_or(path);
        }
        let base = self.target.trim_end_matches('/');
        let separator = if path.starts_with('/') || path.is_empty() {
            ""
        } else {
            "/"
        };
        match request.uri.query() {
            Some(query) => format!("{base}{separator}{path}?{query}"),
            None => format!("{base}{separator}{path}"),
        }
    }
}

#[async_trait]
impl Reply for ProxiedReply {
    fn prepare(&mut self, _ctx: &BuildContext) -> Result<(), MockError> {
        if let Some(message) = self.invalid.take() {
            return Err(MockError::InvalidReply(message));
        }
        let url = reqwest::Url::parse(&self.target).map_err(|e| MockError::InvalidProxyTarget {
            target: self.target.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(MockError::InvalidProxyTarget {
                target: self.target.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }
        Ok(())
    }

    async fn build(
        &self,
        _writer: &mut ResponseWriter,
        request: &RequestValues,
    ) -> Result<Option<ResponseStub>, ReplyError> {
        let url = self.upstream_url(request);

        let mut headers = request.headers.clone();
        for name in &self.remove_headers {
            headers.remove(name.as_str());
        }
        for (name, value) in &self.proxy_headers {
            headers.append(name.clone(), value.clone());
        }

        let response = forward(
            http_client(self.skip_tls_verify),
            request.method.clone(),
            &url,
            headers,
            request.raw_body.clone(),
            self.timeout,
        )
        .await
        .map_err(|e| match e {
            UpstreamError::Timeout => ReplyError::ProxyTimeout {
                target: url.clone(),
                timeout_ms: self.timeout.as_millis(),
            },
            UpstreamError::Transport(message) => ReplyError::Proxy {
                target: url.clone(),
                message,
            },
        })?;

        let mut stub = ResponseStub::new(response.status).with_body(response.body);
        stub.headers = response.headers;
        for (name, value) in &self.response_headers {
            stub.headers.append(name.clone(), value.clone());
        }
        Ok(Some(stub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::get;

    #[test]
    fn test_upstream_url_trimming() {
        let reply = ProxiedReply::to("http://backend:9000/")
            .trim_prefix("/api")
            .trim_suffix(".json");
        assert_eq!(
            reply.upstream_url(&get("/api/users/1.json?expand=true")),
            "http://backend:9000/users/1?expand=true"
        );
        assert_eq!(
            ProxiedReply::to("http://backend").upstream_url(&get("/x")),
            "http://backend/x"
        );
    }

    #[test]
    fn test_prepare_rejects_bad_target() {
        let mut reply = ProxiedReply::to("not a url");
        assert!(matches!(
            reply.prepare(&BuildContext::default()),
            Err(MockError::InvalidProxyTarget { .. })
        ));

        let mut reply = ProxiedReply::to("ftp://files");
        assert!(reply.prepare(&BuildContext::default()).is_err());

        let mut reply = ProxiedReply::to("http://ok").header("bad header", "v");
        assert!(matches!(
            reply.prepare(&BuildContext::default()),
            Err(MockError::InvalidReply(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_reply_error() {
        let mut reply = ProxiedReply::to("http://127.0.0.1:1").timeout(Duration::from_secs(2));
        reply.prepare(&BuildContext::default()).unwrap();
        let err = reply
            .build(&mut ResponseWriter::new(), &get("/"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReplyError::Proxy { .. } | ReplyError::ProxyTimeout { .. }
        ));
    }
}
