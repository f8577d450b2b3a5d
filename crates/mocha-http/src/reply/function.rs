//! Replies driven by caller code, plus the request echo.

use std::fmt::Write as _;

use async_trait::async_trait;
use hyper::StatusCode;

use super::{Reply, ResponseStub, ResponseWriter};
use crate::error::ReplyError;
use crate::request::RequestValues;

type BuildFn = dyn Fn(&RequestValues) -> anyhow::Result<ResponseStub> + Send + Sync;
type HandleFn = dyn Fn(&mut ResponseWriter, &RequestValues) + Send + Sync;

/// Builds the response with a closure. Mappers still run afterwards.
pub struct FunctionReply {
    f: Box<BuildFn>,
}

impl FunctionReply {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&RequestValues) -> anyhow::Result<ResponseStub> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl Reply for FunctionReply {
    async fn build(
        &self,
        _writer: &mut ResponseWriter,
        request: &RequestValues,
    ) -> Result<Option<ResponseStub>, ReplyError> {
        (self.f)(request)
            .map(Some)
            .map_err(|e| ReplyError::Handler(e.to_string()))
    }
}

/// Hands the writer to a closure. Whatever it writes is sent as is.
pub struct HandlerReply {
    f: Box<HandleFn>,
}

impl HandlerReply {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut ResponseWriter, &RequestValues) + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl Reply for HandlerReply {
    async fn build(
        &self,
        writer: &mut ResponseWriter,
        request: &RequestValues,
    ) -> Result<Option<ResponseStub>, ReplyError> {
        (self.f)(writer, request);
        Ok(None)
    }
}

/// Writes a plain text dump of the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoReply;

#[async_trait]
impl Reply for EchoReply {
    async fn build(
        &self,
        writer: &mut ResponseWriter,
        request: &RequestValues,
    ) -> Result<Option<ResponseStub>, ReplyError> {
        let mut dump = String::new();
        let _ = writeln!(dump, "{} {}", request.method, request.uri);
        let mut names: Vec<&str> = request.headers.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        for name in names {
            for value in request.headers.get_all(name) {
                let _ = writeln!(dump, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
            }
        }
        dump.push('\n');
        dump.push_str(&String::from_utf8_lossy(&request.raw_body));

        writer.set_status(StatusCode::OK);
        writer.set_header("content-type", "text/plain; charset=utf-8");
        writer.write_str(&dump);
        Ok(None)
    }
}
