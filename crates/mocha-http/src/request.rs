//! Immutable request snapshot used as the matching input.
//!
//! The dispatcher reads the inbound request once, runs the body through the
//! parser chain and freezes everything into [`RequestValues`]. Matchers,
//! replies, templates and callbacks all read from this snapshot.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use hyper::http::request::Parts;
use hyper::{HeaderMap, Method, Uri};
use serde_json::Value;
use thiserror::Error;

/// Error raised by a [`BodyParser`]. Never fatal: the request proceeds with
/// no parsed body.
#[derive(Debug, Error)]
#[error("{parser}: {message}")]
pub struct BodyParseError {
    pub parser: &'static str,
    pub message: String,
}

/// Converts a raw request body into a [`Value`] that matchers can inspect.
///
/// Parsers are consulted in order; the first one whose `can_parse` returns
/// true handles the body.
pub trait BodyParser: Send + Sync {
    fn can_parse(&self, content_type: &str, head: &Parts) -> bool;
    fn parse(&self, body: &[u8], head: &Parts) -> Result<Value, BodyParseError>;
}

/// `application/json` and `+json` suffixed media types.
pub struct JsonBodyParser;

impl BodyParser for JsonBodyParser {
    fn can_parse(&self, content_type: &str, _head: &Parts) -> bool {
        content_type.contains("application/json") || content_type.contains("+json")
    }

    fn parse(&self, body: &[u8], _head: &Parts) -> Result<Value, BodyParseError> {
        serde_json::from_slice(body).map_err(|e| BodyParseError {
            parser: "json",
            message: e.to_string(),
        })
    }
}

/// `application/x-www-form-urlencoded`. Produces an object of field names to
/// strings, or arrays of strings for repeated fields.
pub struct FormBodyParser;

impl BodyParser for FormBodyParser {
    fn can_parse(&self, content_type: &str, _head: &Parts) -> bool {
        content_type.contains("application/x-www-form-urlencoded")
    }

    fn parse(&self, body: &[u8], _head: &Parts) -> Result<Value, BodyParseError> {
        let text = std::str::from_utf8(body).map_err(|e| BodyParseError {
            parser: "form",
            message: e.to_string(),
        })?;
        let fields = parse_pairs(text, true);
        let object = fields
            .into_iter()
            .map(|(k, mut v)| {
                let value = if v.len() == 1 {
                    Value::String(v.remove(0))
                } else {
                    Value::Array(v.into_iter().map(Value::String).collect())
                };
                (k, value)
            })
            .collect();
        Ok(Value::Object(object))
    }
}

/// `text/*` bodies become a JSON string.
pub struct TextBodyParser;

impl BodyParser for TextBodyParser {
    fn can_parse(&self, content_type: &str, _head: &Parts) -> bool {
        content_type.starts_with("text/")
    }

    fn parse(&self, body: &[u8], _head: &Parts) -> Result<Value, BodyParseError> {
        std::str::from_utf8(body)
            .map(|s| Value::String(s.to_string()))
            .map_err(|e| BodyParseError {
                parser: "text",
                message: e.to_string(),
            })
    }
}

/// Fallback for any other content type: the body as a lossy UTF-8 string.
pub struct BytesBodyParser;

impl BodyParser for BytesBodyParser {
    fn can_parse(&self, _content_type: &str, _head: &Parts) -> bool {
        true
    }

    fn parse(&self, body: &[u8], _head: &Parts) -> Result<Value, BodyParseError> {
        Ok(Value::String(String::from_utf8_lossy(body).into_owned()))
    }
}

/// The built-in parser chain, appended after any caller-supplied parsers.
pub fn default_body_parsers() -> Vec<Arc<dyn BodyParser>> {
    vec![
        Arc::new(JsonBodyParser),
        Arc::new(FormBodyParser),
        Arc::new(TextBodyParser),
        Arc::new(BytesBodyParser),
    ]
}

/// Snapshot of an inbound request.
#[derive(Debug, Clone)]
pub struct RequestValues {
    pub received_at: Instant,
    pub method: Method,
    pub uri: Uri,
    /// Absolute URL, rebuilt from the `Host` header or the server address.
    pub url: String,
    pub scheme: String,
    pub path: String,
    pub segments: Vec<String>,
    pub headers: HeaderMap,
    pub query: HashMap<String, Vec<String>>,
    pub form: HashMap<String, Vec<String>>,
    pub cookies: HashMap<String, String>,
    pub raw_body: Bytes,
    pub body: Option<Value>,
    pub remote_addr: Option<SocketAddr>,
    /// Base URL of the serving mock server.
    pub server_url: String,
}

impl RequestValues {
    /// Build the snapshot. A body parse failure is returned alongside the
    /// snapshot as a warning.
    pub fn from_parts(
        parts: &Parts,
        raw_body: Bytes,
        parsers: &[Arc<dyn BodyParser>],
        server_url: &str,
        remote_addr: Option<SocketAddr>,
    ) -> (Self, Option<BodyParseError>) {
        let content_type = parts
            .headers
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let mut warning = None;
        let body = if raw_body.is_empty() || parts.method == Method::GET || parts.method == Method::HEAD
        {
            None
        } else {
            match parsers.iter().find(|p| p.can_parse(&content_type, parts)) {
                Some(parser) => match parser.parse(&raw_body, parts) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warning = Some(e);
                        None
                    }
                },
                None => None,
            }
        };

        let form = if content_type.contains("application/x-www-form-urlencoded") {
            std::str::from_utf8(&raw_body)
                .map(|s| parse_pairs(s, true))
                .unwrap_or_default()
        } else {
            HashMap::new()
        };

        let path = parts.uri.path().to_string();
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::decode(s).map(|d| d.into_owned()).unwrap_or_else(|_| s.to_string()))
            .collect();

        let scheme = parts.uri.scheme_str().unwrap_or("http").to_string();
        let url = match parts.uri.authority() {
            Some(_) => parts.uri.to_string(),
            None => {
                let base = parts
                    .headers
                    .get(hyper::header::HOST)
                    .and_then(|h| h.to_str().ok())
                    .map(|host| format!("{scheme}://{host}"))
                    .unwrap_or_else(|| server_url.trim_end_matches('/').to_string());
                let path_and_query = parts
                    .uri
                    .path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or("/");
                format!("{base}{path_and_query}")
            }
        };

        let values = RequestValues {
            received_at: Instant::now(),
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            url,
            scheme,
            path,
            segments,
            headers: parts.headers.clone(),
            query: parts
                .uri
                .query()
                .map(|q| parse_pairs(q, false))
                .unwrap_or_default(),
            form,
            cookies: parse_cookies(&parts.headers),
            raw_body,
            body,
            remote_addr,
            server_url: server_url.to_string(),
        };
        (values, warning)
    }

    /// First value of a header, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn form_field(&self, name: &str) -> Option<&str> {
        self.form.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Body as text, preferring the parsed value when it is a string.
    pub fn body_text(&self) -> String {
        match &self.body {
            Some(Value::String(s)) => s.clone(),
            _ => String::from_utf8_lossy(&self.raw_body).into_owned(),
        }
    }
}

/// Parse `a=1&b=2&a=3` into a multimap. Form encoding additionally maps `+`
/// to a space.
pub fn parse_pairs(input: &str, form: bool) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for pair in input.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let decode = |raw: &str| {
            let raw = if form {
                raw.replace('+', " ")
            } else {
                raw.to_string()
            };
            urlencoding::decode(&raw)
                .map(|d| d.into_owned())
                .unwrap_or(raw)
        };
        out.entry(decode(key)).or_default().push(decode(value));
    }
    out
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(hyper::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hyper::Request;

    pub(crate) fn request_values(req: Request<Bytes>) -> RequestValues {
        let (parts, body) = req.into_parts();
        let (values, _) = RequestValues::from_parts(
            &parts,
            body,
            &default_body_parsers(),
            "http://127.0.0.1:8080",
            None,
        );
        values
    }

    pub(crate) fn get(uri: &str) -> RequestValues {
        request_values(Request::get(uri).body(Bytes::new()).unwrap())
    }

    #[test]
    fn test_query_and_segments() {
        let values = get("/users/42/orders?status=open&tag=a&tag=b%20c");
        assert_eq!(values.path, "/users/42/orders");
        assert_eq!(values.segments, vec!["users", "42", "orders"]);
        assert_eq!(values.query_param("status"), Some("open"));
        assert_eq!(values.query.get("tag").unwrap(), &vec!["a", "b c"]);
        assert_eq!(
            values.url,
            "http://127.0.0.1:8080/users/42/orders?status=open&tag=a&tag=b%20c"
        );
    }

    #[test]
    fn test_url_uses_host_header() {
        let values = request_values(
            Request::get("/ping")
                .header("host", "api.local:9000")
                .body(Bytes::new())
                .unwrap(),
        );
        assert_eq!(values.url, "http://api.local:9000/ping");
    }

    #[test]
    fn test_json_body_parsed() {
        let values = request_values(
            Request::post("/items")
                .header("content-type", "application/json; charset=utf-8")
                .body(Bytes::from_static(br#"{"name":"coffee","qty":2}"#))
                .unwrap(),
        );
        assert_eq!(values.body.as_ref().unwrap()["name"], "coffee");
    }

    #[test]
    fn test_invalid_json_is_a_warning() {
        let req = Request::post("/items")
            .header("content-type", "application/json")
            .body(Bytes::from_static(b"{not json"))
            .unwrap();
        let (parts, body) = req.into_parts();
        let (values, warning) =
            RequestValues::from_parts(&parts, body, &default_body_parsers(), "http://x", None);
        assert!(values.body.is_none());
        assert_eq!(warning.unwrap().parser, "json");
        assert_eq!(values.body_text(), "{not json");
    }

    #[test]
    fn test_form_body() {
        let values = request_values(
            Request::post("/login")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Bytes::from_static(b"user=jane+doe&role=a&role=b"))
                .unwrap(),
        );
        assert_eq!(values.form_field("user"), Some("jane doe"));
        let body = values.body.unwrap();
        assert_eq!(body["user"], "jane doe");
        assert_eq!(body["role"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_get_body_not_parsed() {
        let values = request_values(
            Request::get("/")
                .header("content-type", "application/json")
                .body(Bytes::from_static(b"{}"))
                .unwrap(),
        );
        assert!(values.body.is_none());
        assert_eq!(values.raw_body.len(), 2);
    }

    #[test]
    fn test_cookies() {
        let values = request_values(
            Request::get("/")
                .header("cookie", "session=abc; theme=dark")
                .body(Bytes::new())
                .unwrap(),
        );
        assert_eq!(values.cookie("session"), Some("abc"));
        assert_eq!(values.cookie("theme"), Some("dark"));
    }

    struct RejectAll;

    impl BodyParser for RejectAll {
        fn can_parse(&self, _content_type: &str, _head: &Parts) -> bool {
            true
        }
        fn parse(&self, _body: &[u8], _head: &Parts) -> Result<Value, BodyParseError> {
            Ok(Value::String("custom".into()))
        }
    }

    #[test]
    fn test_custom_parser_runs_first() {
        let mut parsers: Vec<Arc<dyn BodyParser>> = vec![Arc::new(RejectAll)];
        parsers.extend(default_body_parsers());
        let req = Request::put("/")
            .header("content-type", "application/json")
            .body(Bytes::from_static(b"{}"))
            .unwrap();
        let (parts, body) = req.into_parts();
        let (values, _) = RequestValues::from_parts(&parts, body, &parsers, "http://x", None);
        assert_eq!(values.body, Some(Value::String("custom".into())));
    }
}
