//! Error types shared across the engine.
//!
//! Registration problems surface as [`MockError`] and are returned to the
//! caller. Everything that happens while serving a request is either a
//! [`ReplyError`] (turned into a diagnostic response) or a [`MatchError`]
//! (turned into a mismatch entry).

use std::net::SocketAddr;

use thiserror::Error;

/// Failures detected while building or registering a mock.
#[derive(Debug, Error)]
pub enum MockError {
    #[error("mock: at least 1 request expectation must be set")]
    NoExpectations,

    #[error("mock: no reply set, use .reply() to define how the mock responds")]
    NoReply,

    #[error("reply_random: at least one reply must be configured")]
    EmptyRandom,

    #[error("reply_sequence: at least one reply must be configured")]
    EmptySequence,

    #[error("reply: failed to parse template: {0}")]
    Template(String),

    #[error("reply_proxy: invalid target '{target}': {reason}")]
    InvalidProxyTarget { target: String, reason: String },

    #[error("reply: {0}")]
    InvalidReply(String),

    #[error("mock: scenario state was set without a scenario name")]
    ScenarioWithoutName,

    #[error("mock: post action '{0}' is not registered")]
    UnknownPostAction(String),
}

/// Failures produced by a reply while building the response for a request.
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error(
        "reply_sequence: unable to obtain a response and no after-ended reply was set. \
         request number={request}, sequence size={size}"
    )]
    SequenceExhausted { request: usize, size: usize },

    #[error("reply_proxy: request to {target} failed: {message}")]
    Proxy { target: String, message: String },

    #[error("reply_proxy: request to {target} timed out after {timeout_ms}ms")]
    ProxyTimeout { target: String, timeout_ms: u128 },

    #[error("reply: failed to render template: {0}")]
    Template(String),

    #[error("reply: failed to read body file {path}: {source}")]
    BodyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("reply: failed to gzip response body: {0}")]
    Encoding(#[source] std::io::Error),

    #[error("reply: handler failed: {0}")]
    Handler(String),

    #[error("reply: {0} was used before it was prepared")]
    NotPrepared(&'static str),
}

/// Failures raised by a matcher. These never abort a lookup, they are
/// recorded as a failed expectation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatchError {
    #[error("matcher {matcher} failed: {message}")]
    Failed { matcher: String, message: String },

    #[error("matcher {matcher} panicked: {message}")]
    Panicked { matcher: String, message: String },
}

impl MatchError {
    pub fn failed(matcher: impl Into<String>, message: impl Into<String>) -> Self {
        MatchError::Failed {
            matcher: matcher.into(),
            message: message.into(),
        }
    }
}

/// Failures of the listening server itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server is already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Mock(#[from] MockError),
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_exhausted_message() {
        let err = ReplyError::SequenceExhausted {
            request: 3,
            size: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("request number=3"));
        assert!(msg.contains("sequence size=2"));
    }

    #[test]
    fn test_panic_message_variants() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(boxed.as_ref()), "owned boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
