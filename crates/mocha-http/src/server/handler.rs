//! Request dispatch pipeline.
//!
//! Every request goes through the same steps: snapshot the request, find a
//! mock, wait out its delay, build and map the response, then run the
//! post-serve hooks, callbacks and post actions before handing the response
//! to hyper. Hooks run after the response is final and can no longer change
//! it. A panic anywhere in the pipeline becomes a 500.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::FutureExt;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::http::request::Parts;
use hyper::{Method, Request, Response, StatusCode};
use tracing::{debug, info, warn};

use super::proxy::{self, is_proxy_error};
use super::response::{
    diagnostic_response, full_body, no_match_report, stub_to_response, MockBody,
};
use super::ServerState;
use crate::error::panic_message;
use crate::events::MockEvent;
use crate::finder::{find_mock, FindResult};
use crate::headers::{MochaHeadersExt, VALUE_DISPATCH, VALUE_NO_MATCH, VALUE_PANIC, X_MOCHA_MOCK_ID};
use crate::metrics;
use crate::mock::{Mock, ServedContext};
use crate::recording::RecordedExchange;
use crate::reply::{ResponseStub, ResponseWriter};
use crate::request::RequestValues;

/// Reserved path for the Prometheus exposition when metrics are enabled.
pub const METRICS_PATH: &str = "/__mocha/metrics";

/// Gives back a claimed hit unless the dispatch completes. Covers errors,
/// panics and requests dropped while waiting on a delay.
struct ClaimGuard<'a> {
    mock: &'a Mock,
    committed: bool,
}

impl<'a> ClaimGuard<'a> {
    fn new(mock: &'a Mock) -> Self {
        Self {
            mock,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.mock.release();
        }
    }
}

/// hyper service entry point.
pub(crate) async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
    remote: SocketAddr,
) -> Result<Response<MockBody>, Infallible> {
    if state.config.metrics && req.uri().path() == METRICS_PATH {
        let mut response = Response::new(full_body(metrics::collect_metrics()));
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        );
        return Ok(response);
    }

    if req.method() == Method::CONNECT {
        if let Some(passthrough) = state.passthrough.as_ref().filter(|p| p.tunnels_connect()) {
            debug!(uri = %req.uri(), "Tunneling CONNECT");
            return Ok(proxy::tunnel(req, passthrough.timeout()).await);
        }
    }

    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return Ok(diagnostic_response(
                StatusCode::BAD_REQUEST,
                &VALUE_DISPATCH,
                format!("FAILED TO READ REQUEST BODY\n{e}\n"),
            ));
        }
    };

    Ok(dispatch(&state, parts, body, Some(remote)).await)
}

/// Run the dispatch pipeline on an already collected request.
pub(crate) async fn dispatch(
    state: &ServerState,
    parts: Parts,
    body: Bytes,
    remote: Option<SocketAddr>,
) -> Response<MockBody> {
    let started = Instant::now();
    let outcome = AssertUnwindSafe(dispatch_inner(state, &parts, body, remote, started))
        .catch_unwind()
        .await;

    match outcome {
        Ok(response) => response,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(
                method = %parts.method,
                path = %parts.uri.path(),
                panic = %message,
                "Panic during request dispatch"
            );
            state.events.emit(MockEvent::Error {
                message: format!("panic during dispatch: {message}"),
            });
            metrics::record_request("panic", elapsed_ms(started));
            diagnostic_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &VALUE_PANIC,
                format!("PANIC DURING REQUEST DISPATCH\n{message}\n"),
            )
        }
    }
}

async fn dispatch_inner(
    state: &ServerState,
    parts: &Parts,
    body: Bytes,
    remote: Option<SocketAddr>,
    started: Instant,
) -> Response<MockBody> {
    let base_url = state.base_url();
    let (request, parse_error) =
        RequestValues::from_parts(parts, body.clone(), &state.body_parsers, &base_url, remote);
    if let Some(e) = parse_error {
        warn!(path = %request.path, error = %e, "Request body could not be parsed");
        state.events.emit(MockEvent::Warning {
            message: format!("{} {}: {e}", request.method, request.path),
        });
    }

    debug!(method = %request.method, path = %request.path, "Received request");
    state.events.emit(MockEvent::RequestReceived {
        method: request.method.to_string(),
        path: request.path.clone(),
    });

    let mocks = state.store.get_eligible();
    let result = find_mock(&mocks, &request);
    match result.mock.clone() {
        Some(mock) => serve(state, &mock, &request, started).await,
        None => not_matched(state, parts, body, &request, result, started).await,
    }
}

async fn serve(
    state: &ServerState,
    mock: &Arc<Mock>,
    request: &RequestValues,
    started: Instant,
) -> Response<MockBody> {
    let claim = ClaimGuard::new(mock);

    if let Some(delay) = mock.delay() {
        let delay = delay.min(state.config.max_delay());
        let mut shutdown = state.shutdown_tx.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.recv() => {
                debug!(mock_id = %mock.id(), "Delay interrupted by shutdown");
                return diagnostic_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    &VALUE_DISPATCH,
                    "SERVER SHUTTING DOWN\n".to_string(),
                );
            }
        }
    }

    let (stub, written) = match build_stub(mock, request).await {
        Ok(built) => built,
        Err(message) => {
            drop(claim);
            warn!(mock_id = %mock.id(), error = %message, "Failed to build response");
            state.events.emit(MockEvent::Error {
                message: format!("mock {}: {message}", mock.display_name()),
            });
            metrics::record_request("error", elapsed_ms(started));
            return diagnostic_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &VALUE_DISPATCH,
                format!(
                    "FAILED TO BUILD RESPONSE\nmock: {}\n{message}\n",
                    mock.display_name()
                ),
            );
        }
    };

    let mut response = stub_to_response(&stub);
    if !written {
        response.set_header_value(&X_MOCHA_MOCK_ID, mock.id());
    }
    claim.commit();

    after_served(state, mock, request, &stub);

    let elapsed = started.elapsed();
    info!(
        mock_id = %mock.id(),
        status = stub.status.as_u16(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Served mock response"
    );
    metrics::record_mock_hit(mock.display_name());
    metrics::record_request("matched", elapsed_ms(started));
    state.events.emit(MockEvent::Matched {
        mock_id: mock.id().to_string(),
        mock_name: mock.name().map(str::to_string),
        status: stub.status,
        elapsed,
    });
    state.record(RecordedExchange::new(
        request,
        &stub,
        Some(mock.id().to_string()),
        false,
    ));

    response
}

/// Produce the final stub: the reply output with every mapper applied in
/// order. Replies that wrote to the writer skip the mappers and are flagged
/// so nothing is added to what they wrote.
async fn build_stub(
    mock: &Mock,
    request: &RequestValues,
) -> Result<(ResponseStub, bool), String> {
    let mut writer = ResponseWriter::new();
    let built = mock
        .reply()
        .build(&mut writer, request)
        .await
        .map_err(|e| e.to_string())?;

    let Some(mut stub) = built else {
        return Ok((writer.into_stub(), true));
    };
    for (index, mapper) in mock.mappers.iter().enumerate() {
        mapper(request, &mut stub).map_err(|e| format!("response mapper {index} failed: {e}"))?;
    }
    Ok((stub, false))
}

/// Post-serve hooks. Failures are logged, the response is already final.
fn after_served(state: &ServerState, mock: &Mock, request: &RequestValues, stub: &ResponseStub) {
    for (matcher, error) in mock.on_served() {
        warn!(mock_id = %mock.id(), matcher = %matcher, error = %error, "Post-serve hook failed");
        state.events.emit(MockEvent::Warning {
            message: format!("mock {}: {matcher}: {error}", mock.display_name()),
        });
    }

    let served = ServedContext {
        request,
        mock,
        response: stub,
    };

    for (index, callback) in mock.callbacks.iter().enumerate() {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&served)));
        let failure = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        warn!(mock_id = %mock.id(), callback = index, error = %failure, "Callback failed");
        state.events.emit(MockEvent::Warning {
            message: format!("mock {}: callback {index}: {failure}", mock.display_name()),
        });
    }

    for bound in &mock.post_actions {
        let outcome =
            std::panic::catch_unwind(AssertUnwindSafe(|| bound.action.run(&served, &bound.params)));
        let failure = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        warn!(mock_id = %mock.id(), action = %bound.name, error = %failure, "Post action failed");
        state.events.emit(MockEvent::Warning {
            message: format!(
                "mock {}: post action {}: {failure}",
                mock.display_name(),
                bound.name
            ),
        });
    }
}

async fn not_matched(
    state: &ServerState,
    parts: &Parts,
    body: Bytes,
    request: &RequestValues,
    result: FindResult,
    started: Instant,
) -> Response<MockBody> {
    if let Some(passthrough) = &state.passthrough {
        let forwarded = passthrough.forward(parts, body).await;
        let status = forwarded.response.status();
        let outcome = if is_proxy_error(&forwarded.response) {
            "error"
        } else {
            "proxied"
        };
        info!(method = %request.method, path = %request.path, status = status.as_u16(), "Proxied unmatched request");
        metrics::record_request(outcome, elapsed_ms(started));
        state.events.emit(MockEvent::Proxied {
            method: request.method.to_string(),
            path: request.path.clone(),
            status,
        });
        if let Some(stub) = &forwarded.stub {
            state.record(RecordedExchange::new(request, stub, None, true));
        }
        return forwarded.response;
    }

    info!(
        method = %request.method,
        path = %request.path,
        closest = result.closest.as_ref().map(|m| m.id()).unwrap_or("none"),
        mismatches = result.mismatches.len(),
        "Request did not match any mock"
    );
    metrics::record_request("no_match", elapsed_ms(started));
    let report = no_match_report(request, &result);
    state.events.emit(MockEvent::NotMatched {
        method: request.method.to_string(),
        path: request.path.clone(),
        closest: result.closest.as_ref().map(|m| m.id().to_string()),
        mismatches: result.mismatches,
    });

    diagnostic_response(state.config.no_match_status(), &VALUE_NO_MATCH, report)
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
