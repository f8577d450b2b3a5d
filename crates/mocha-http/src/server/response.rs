//! Conversion of reply output into hyper responses, plus the fixed
//! diagnostic responses.

use std::convert::Infallible;
use std::fmt::Write as _;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::{HeaderValue, CONTENT_TYPE, SET_COOKIE};
use hyper::{Response, StatusCode};

use crate::finder::FindResult;
use crate::headers::{MochaHeadersExt, X_MOCHA_ERROR};
use crate::reply::ResponseStub;
use crate::request::RequestValues;

pub type MockBody = BoxBody<Bytes, Infallible>;

pub(crate) fn full_body(body: impl Into<Bytes>) -> MockBody {
    Full::new(body.into()).boxed()
}

pub(crate) fn empty_body() -> MockBody {
    full_body(Bytes::new())
}

/// Write a stub out as a response. Trailers switch the body to a framed
/// stream so they can be sent after the data.
pub(crate) fn stub_to_response(stub: &ResponseStub) -> Response<MockBody> {
    let body = if stub.trailers.is_empty() {
        full_body(stub.body.clone())
    } else {
        let frames: Vec<Result<Frame<Bytes>, Infallible>> = vec![
            Ok(Frame::data(stub.body.clone())),
            Ok(Frame::trailers(stub.trailers.clone())),
        ];
        StreamBody::new(futures::stream::iter(frames)).boxed()
    };

    let mut response = Response::new(body);
    *response.status_mut() = stub.status;
    *response.headers_mut() = stub.headers.clone();
    for cookie in &stub.cookies {
        if let Ok(value) = HeaderValue::from_str(&cookie.to_header_value()) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
    response
}

/// Plain text response tagged with `x-mocha-error`.
pub(crate) fn diagnostic_response(
    status: StatusCode,
    kind: &HeaderValue,
    body: String,
) -> Response<MockBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response.set_header(&X_MOCHA_ERROR, kind);
    response
}

/// Report listing the closest mock and every mismatch.
pub(crate) fn no_match_report(request: &RequestValues, result: &FindResult) -> String {
    let mut out = String::from("REQUEST DID NOT MATCH\n\n");
    let _ = writeln!(out, "Request: {} {}", request.method, request.uri);
    let _ = writeln!(out, "URL: {}", request.url);

    match &result.closest {
        Some(mock) => {
            let _ = writeln!(
                out,
                "\nClosest Match: {} {}",
                mock.id(),
                mock.name().unwrap_or_default()
            );
        }
        None => out.push_str("\nClosest Match: none\n"),
    }

    if result.mismatches.is_empty() {
        out.push_str("\nNo mocks registered.\n");
    } else {
        out.push_str("\nMismatches:\n");
        for mismatch in &result.mismatches {
            let _ = writeln!(out, "  - {mismatch}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::Cookie;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_stub_to_response() {
        let mut stub = ResponseStub::new(StatusCode::CREATED).with_body("made");
        stub.insert_header("x-one", "1");
        stub.cookies.push(Cookie::new("a", "1"));
        stub.cookies.push(Cookie::new("b", "2"));

        let response = stub_to_response(&stub);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-one"], "1");
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 2);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"made");
    }

    #[tokio::test]
    async fn test_trailers_are_sent_after_data() {
        let mut stub = ResponseStub::new(StatusCode::OK).with_body("data");
        stub.trailers
            .insert("x-checksum", HeaderValue::from_static("abc"));

        let collected = stub_to_response(&stub)
            .into_body()
            .collect()
            .await
            .unwrap();
        assert_eq!(collected.trailers().unwrap()["x-checksum"], "abc");
        assert_eq!(&collected.to_bytes()[..], b"data");
    }
}
