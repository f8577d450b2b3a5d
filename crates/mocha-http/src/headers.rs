//! Static header names and helpers shared by the dispatcher and proxies.

use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Response};

pub static X_MOCHA_ERROR: HeaderName = HeaderName::from_static("x-mocha-error");
pub static X_MOCHA_MOCK_ID: HeaderName = HeaderName::from_static("x-mocha-mock-id");
pub static X_MOCHA_PROXIED: HeaderName = HeaderName::from_static("x-mocha-proxied");

pub static VALUE_TRUE: HeaderValue = HeaderValue::from_static("true");
pub static VALUE_DISPATCH: HeaderValue = HeaderValue::from_static("dispatch");
pub static VALUE_PANIC: HeaderValue = HeaderValue::from_static("panic");
pub static VALUE_NO_MATCH: HeaderValue = HeaderValue::from_static("no-match");
pub static VALUE_PROXY: HeaderValue = HeaderValue::from_static("proxy");

/// Connection scoped headers that must not be forwarded by a proxy.
pub const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect();
    for name in HOP_BY_HOP.iter().copied().chain(listed.iter().map(String::as_str)) {
        headers.remove(name);
    }
}

pub trait MochaHeadersExt {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue);

    /// Returns false if `value` is not a valid header value.
    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool;
}

impl<B> MochaHeadersExt for Response<B> {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers_mut().insert(name.clone(), value.clone());
    }

    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool {
        match HeaderValue::from_str(value) {
            Ok(header_value) => {
                self.headers_mut().insert(name.clone(), header_value);
                true
            }
            Err(_) => false,
        }
    }
}
