//! Fixed responses, optionally templated and gzip encoded.

use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use hyper::header::{HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::Value;

use super::{Cookie, Reply, ResponseStub, ResponseWriter};
use crate::error::{MockError, ReplyError};
use crate::mock::BuildContext;
use crate::request::RequestValues;
use crate::template::{render_to_string, template_data, TemplateRenderer};

/// Static response. Builder errors (bad status, bad header) are reported
/// when the mock is built.
pub struct StaticReply {
    status: StatusCode,
    headers: HeaderMap,
    trailers: HeaderMap,
    cookies: Vec<Cookie>,
    body: Bytes,
    body_file: Option<PathBuf>,
    gzip: bool,
    body_template: Option<String>,
    header_templates: Vec<(String, String)>,
    template_data: Value,
    invalid: Option<String>,
    compiled_body: Option<Box<dyn TemplateRenderer>>,
    compiled_headers: Vec<(HeaderName, Box<dyn TemplateRenderer>)>,
    ext: Value,
}

impl Default for StaticReply {
    fn default() -> Self {
        Self::ok()
    }
}

impl StaticReply {
    pub fn new(status: u16) -> Self {
        let mut reply = Self::with_status(StatusCode::OK);
        match StatusCode::from_u16(status) {
            Ok(status) => reply.status = status,
            Err(_) => reply.invalid = Some(format!("invalid status code {status}")),
        }
        reply
    }

    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            cookies: Vec::new(),
            body: Bytes::new(),
            body_file: None,
            gzip: false,
            body_template: None,
            header_templates: Vec::new(),
            template_data: Value::Null,
            invalid: None,
            compiled_body: None,
            compiled_headers: Vec::new(),
            ext: Value::Null,
        }
    }

    pub fn ok() -> Self {
        Self::with_status(StatusCode::OK)
    }

    pub fn created() -> Self {
        Self::with_status(StatusCode::CREATED)
    }

    pub fn accepted() -> Self {
        Self::with_status(StatusCode::ACCEPTED)
    }

    pub fn no_content() -> Self {
        Self::with_status(StatusCode::NO_CONTENT)
    }

    pub fn bad_request() -> Self {
        Self::with_status(StatusCode::BAD_REQUEST)
    }

    pub fn unauthorized() -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED)
    }

    pub fn forbidden() -> Self {
        Self::with_status(StatusCode::FORBIDDEN)
    }

    pub fn not_found() -> Self {
        Self::with_status(StatusCode::NOT_FOUND)
    }

    pub fn internal_server_error() -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn record_invalid(&mut self, message: String) {
        if self.invalid.is_none() {
            self.invalid = Some(message);
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => self.record_invalid(format!("invalid header {name}: {value}")),
        }
        self
    }

    pub fn content_type(mut self, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(CONTENT_TYPE, value);
            }
            Err(_) => self.record_invalid(format!("invalid content type {value}")),
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn text(self, body: impl Into<String>) -> Self {
        self.content_type("text/plain; charset=utf-8")
            .body(Bytes::from(body.into()))
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        match serde_json::to_vec(body) {
            Ok(bytes) => self.content_type("application/json").body(bytes),
            Err(e) => {
                self.record_invalid(format!("failed to serialize JSON body: {e}"));
                self
            }
        }
    }

    /// Read the body from a file on every request.
    pub fn body_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.body_file = Some(path.into());
        self
    }

    /// Body rendered through the template engine on every request.
    pub fn body_template(mut self, template: impl Into<String>) -> Self {
        self.body_template = Some(template.into());
        self
    }

    pub fn header_template(mut self, name: &str, template: impl Into<String>) -> Self {
        self.header_templates
            .push((name.to_string(), template.into()));
        self
    }

    /// Extra values exposed to templates as `ext`, merged over the
    /// server-wide template data.
    pub fn template_data(mut self, data: Value) -> Self {
        self.template_data = data;
        self
    }

    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    pub fn trailer(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.trailers.append(name, value);
            }
            _ => self.record_invalid(format!("invalid trailer {name}: {value}")),
        }
        self
    }

    pub fn gzip(mut self) -> Self {
        self.gzip = true;
        self
    }

    fn has_templates(&self) -> bool {
        self.compiled_body.is_some() || !self.compiled_headers.is_empty()
    }
}

/// Shallow merge of two objects, `overlay` wins.
pub(crate) fn merge_ext(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (k, v) in overlay {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (base, Value::Null) => base.clone(),
        (_, overlay) => overlay.clone(),
    }
}

pub(crate) fn gzip_body(body: &[u8]) -> Result<Bytes, ReplyError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).map_err(ReplyError::Encoding)?;
    encoder.finish().map(Bytes::from).map_err(ReplyError::Encoding)
}

#[async_trait]
impl Reply for StaticReply {
    fn prepare(&mut self, ctx: &BuildContext) -> Result<(), MockError> {
        if let Some(message) = self.invalid.take() {
            return Err(MockError::InvalidReply(message));
        }

        if let Some(source) = &self.body_template {
            let renderer = ctx
                .templates
                .parse(source)
                .map_err(|e| MockError::Template(e.to_string()))?;
            self.compiled_body = Some(renderer);
        }

        for (name, source) in &self.header_templates {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| MockError::InvalidReply(format!("invalid header name {name}")))?;
            let renderer = ctx
                .templates
                .parse(source)
                .map_err(|e| MockError::Template(e.to_string()))?;
            self.compiled_headers.push((name, renderer));
        }

        self.ext = merge_ext(&ctx.template_data, &self.template_data);
        Ok(())
    }

    async fn build(
        &self,
        _writer: &mut ResponseWriter,
        request: &RequestValues,
    ) -> Result<Option<ResponseStub>, ReplyError> {
        let mut stub = ResponseStub {
            status: self.status,
            headers: self.headers.clone(),
            trailers: self.trailers.clone(),
            cookies: self.cookies.clone(),
            body: self.body.clone(),
            encoding: None,
        };

        if let Some(path) = &self.body_file {
            let contents = tokio::fs::read(path)
                .await
                .map_err(|source| ReplyError::BodyFile {
                    path: path.display().to_string(),
                    source,
                })?;
            stub.body = Bytes::from(contents);
        }

        if self.has_templates() {
            let data = template_data(request, &self.ext);
            if let Some(renderer) = &self.compiled_body {
                let rendered = render_to_string(renderer.as_ref(), &data)
                    .map_err(|e| ReplyError::Template(e.to_string()))?;
                stub.body = Bytes::from(rendered);
            }
            for (name, renderer) in &self.compiled_headers {
                let rendered = render_to_string(renderer.as_ref(), &data)
                    .map_err(|e| ReplyError::Template(e.to_string()))?;
                let value = HeaderValue::from_str(&rendered).map_err(|_| {
                    ReplyError::Template(format!("rendered header {name} is not a valid value"))
                })?;
                stub.headers.insert(name.clone(), value);
            }
        }

        if self.gzip {
            stub.body = gzip_body(&stub.body)?;
            stub.headers
                .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            stub.headers.remove(CONTENT_LENGTH);
            stub.encoding = Some("gzip".to_string());
        }

        Ok(Some(stub))
    }
}
