//! Reply strategies.
//!
//! A [`Reply`] turns a matched request into a response. Most replies return
//! a [`ResponseStub`] that the dispatcher writes out after running the
//! mock's mappers. Replies that write straight into the [`ResponseWriter`]
//! return `None` instead, and the dispatcher sends whatever was written
//! without touching it.

mod function;
mod proxied;
mod random;
mod sequential;
mod static_reply;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, StatusCode};

use crate::error::{MockError, ReplyError};
use crate::mock::BuildContext;
use crate::request::RequestValues;

pub use function::{EchoReply, FunctionReply, HandlerReply};
pub use proxied::ProxiedReply;
pub use random::RandomReply;
pub use sequential::SequentialReply;
pub use static_reply::StaticReply;

#[async_trait]
pub trait Reply: Send + Sync {
    /// Validate and pre-compute at registration time.
    fn prepare(&mut self, _ctx: &BuildContext) -> Result<(), MockError> {
        Ok(())
    }

    /// Build the response for `request`. `Ok(None)` means the reply wrote
    /// everything into `writer` itself.
    async fn build(
        &self,
        writer: &mut ResponseWriter,
        request: &RequestValues,
    ) -> Result<Option<ResponseStub>, ReplyError>;
}

#[async_trait]
impl<R: Reply + ?Sized> Reply for Box<R> {
    fn prepare(&mut self, ctx: &BuildContext) -> Result<(), MockError> {
        (**self).prepare(ctx)
    }

    async fn build(
        &self,
        writer: &mut ResponseWriter,
        request: &RequestValues,
    ) -> Result<Option<ResponseStub>, ReplyError> {
        (**self).build(writer, request).await
    }
}

/// A cookie to set on the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: None,
            http_only: false,
            secure: false,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        out
    }
}

/// Response produced by a reply, before it is written to the client.
#[derive(Debug, Clone)]
pub struct ResponseStub {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub trailers: HeaderMap,
    pub cookies: Vec<Cookie>,
    pub body: Bytes,
    /// Set to `gzip` once the body has been compressed.
    pub encoding: Option<String>,
}

impl Default for ResponseStub {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl ResponseStub {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            cookies: Vec::new(),
            body: Bytes::new(),
            encoding: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Insert a header, ignoring names or values that are not valid HTTP.
    pub fn insert_header(&mut self, name: &str, value: &str) -> bool {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
                true
            }
            _ => false,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Captures what a reply writes directly. Also used for the final response
/// so it can be recorded without a second round trip.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    pub fn write_str(&mut self, data: &str) {
        self.write(data.as_bytes());
    }

    /// True once anything was written.
    pub fn is_written(&self) -> bool {
        self.status.is_some() || !self.headers.is_empty() || !self.body.is_empty()
    }

    /// Status defaults to 200 when none was set. Headers are taken as written.
    pub fn into_stub(self) -> ResponseStub {
        ResponseStub {
            status: self.status.unwrap_or(StatusCode::OK),
            headers: self.headers,
            trailers: HeaderMap::new(),
            cookies: Vec::new(),
            body: Bytes::from(self.body),
            encoding: None,
        }
    }
}
