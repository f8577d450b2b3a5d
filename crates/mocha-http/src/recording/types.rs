//! Serializable request/response summaries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hyper::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::reply::ResponseStub;
use crate::request::RequestValues;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
}

/// One request and the response it received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedExchange {
    pub recorded_at: DateTime<Utc>,
    /// Mock that served the request, `None` when it was proxied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_id: Option<String>,
    #[serde(default)]
    pub proxied: bool,
    pub request: RecordedRequest,
    pub response: RecordedResponse,
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        out.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}

impl RecordedExchange {
    pub fn new(
        request: &RequestValues,
        response: &ResponseStub,
        mock_id: Option<String>,
        proxied: bool,
    ) -> Self {
        // Encoded bodies are summarized, not decoded
        let response_body = match &response.encoding {
            Some(encoding) => format!("<{} bytes, {encoding} encoded>", response.body.len()),
            None => response.body_text(),
        };

        Self {
            recorded_at: Utc::now(),
            mock_id,
            proxied,
            request: RecordedRequest {
                method: request.method.as_str().to_string(),
                path: request.path.clone(),
                query: request.uri.query().map(str::to_string),
                headers: header_map(&request.headers),
                body: String::from_utf8_lossy(&request.raw_body).into_owned(),
            },
            response: RecordedResponse {
                status: response.status.as_u16(),
                headers: header_map(&response.headers),
                body: response_body,
            },
        }
    }
}
