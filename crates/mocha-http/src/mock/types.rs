//! Core data model: expectations, mocks and match results.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::{panic_message, MatchError};
use crate::matcher::{MatchInput, MatchOutcome, Matcher};
use crate::reply::{Reply, ResponseStub};
use crate::request::RequestValues;

/// Relative weights used to rank partial matches.
pub mod weight {
    pub const NONE: u32 = 0;
    pub const VERY_LOW: u32 = 2;
    pub const LOW: u32 = 4;
    pub const REGULAR: u32 = 6;
    pub const HIGH: u32 = 8;
}

/// Part of the request an expectation looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Method,
    Scheme,
    Url,
    Path,
    Header,
    Query,
    Form,
    Body,
    Request,
    Repeat,
    Scenario,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Method => "method",
            Target::Scheme => "scheme",
            Target::Url => "url",
            Target::Path => "path",
            Target::Header => "header",
            Target::Query => "query",
            Target::Form => "form",
            Target::Body => "body",
            Target::Request => "request",
            Target::Repeat => "repeat",
            Target::Scenario => "scenario",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure function selecting the value an expectation matches against.
pub type ValueSelector = Arc<dyn Fn(&RequestValues) -> Value + Send + Sync>;

/// One predicate of a mock.
pub struct Expectation {
    pub target: Target,
    /// Header, query or form key, when the target has one.
    pub key: Option<String>,
    pub selector: ValueSelector,
    pub matcher: Box<dyn Matcher>,
    pub weight: u32,
}

impl Expectation {
    pub fn new(
        target: Target,
        key: Option<String>,
        selector: ValueSelector,
        matcher: Box<dyn Matcher>,
        weight: u32,
    ) -> Self {
        Self {
            target,
            key,
            selector,
            matcher,
            weight,
        }
    }

    /// Diagnostic label such as `header(x-key)` or `method`.
    pub fn label(&self) -> String {
        match &self.key {
            Some(key) => format!("{}({})", self.target, key),
            None => self.target.to_string(),
        }
    }

    /// A panic in the selector or the matcher is reported as
    /// [`MatchError::Panicked`] and never escapes the lookup.
    pub fn evaluate(&self, request: &RequestValues) -> Result<MatchOutcome, MatchError> {
        catch_unwind(AssertUnwindSafe(|| {
            let value = (self.selector)(request);
            self.matcher.matches(&MatchInput {
                value: &value,
                request,
            })
        }))
        .unwrap_or_else(|payload| {
            Err(MatchError::Panicked {
                matcher: self.matcher.name().to_string(),
                message: panic_message(payload.as_ref()),
            })
        })
    }
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectation")
            .field("target", &self.label())
            .field("matcher", &self.matcher.name())
            .field("weight", &self.weight)
            .finish()
    }
}

/// Why one expectation of one mock failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MismatchDetail {
    pub mock_id: String,
    pub mock_name: Option<String>,
    pub matcher: String,
    pub target: String,
    pub reason: String,
}

impl fmt::Display for MismatchDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} on {}: {}",
            self.mock_name.as_deref().unwrap_or(&self.mock_id),
            self.matcher,
            self.target,
            self.reason
        )
    }
}

/// Evaluation of every expectation of a mock against one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub matched: bool,
    /// Sum of the weights of passing expectations.
    pub weight: u32,
    pub mismatches: Vec<MismatchDetail>,
}

/// Rewrites a built response before it is written.
pub type Mapper = Arc<dyn Fn(&RequestValues, &mut ResponseStub) -> anyhow::Result<()> + Send + Sync>;

/// What callbacks and post actions get to see once a mock has served.
pub struct ServedContext<'a> {
    pub request: &'a RequestValues,
    pub mock: &'a Mock,
    pub response: &'a ResponseStub,
}

pub type Callback = Arc<dyn Fn(&ServedContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Named side effect registered on the server and referenced by mocks.
pub trait PostAction: Send + Sync {
    fn run(&self, served: &ServedContext<'_>, params: &Value) -> anyhow::Result<()>;
}

/// Reference from a mock to a registered [`PostAction`].
#[derive(Clone)]
pub(crate) struct BoundPostAction {
    pub name: String,
    pub params: Value,
    pub action: Arc<dyn PostAction>,
}

/// A registered request predicate paired with a reply.
pub struct Mock {
    pub(crate) id: String,
    pub(crate) name: Option<String>,
    pub(crate) priority: AtomicI64,
    pub(crate) enabled: AtomicBool,
    pub(crate) expectations: Vec<Expectation>,
    pub(crate) reply: Box<dyn Reply>,
    pub(crate) hits: Arc<AtomicUsize>,
    pub(crate) limit: Option<usize>,
    pub(crate) source: Option<String>,
    pub(crate) delay: Option<Duration>,
    pub(crate) mappers: Vec<Mapper>,
    pub(crate) callbacks: Vec<Callback>,
    pub(crate) post_actions: Vec<BoundPostAction>,
    pub(crate) created_at: DateTime<Utc>,
}

impl Mock {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name when set, id otherwise.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn priority(&self) -> i64 {
        self.priority.load(Ordering::Acquire)
    }

    pub(crate) fn set_priority(&self, priority: i64) {
        self.priority.store(priority, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Acquire)
    }

    pub fn has_been_called(&self) -> bool {
        self.hits() > 0
    }

    /// Maximum number of responses this mock serves, if limited.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    pub fn reply(&self) -> &dyn Reply {
        self.reply.as_ref()
    }

    pub fn expectations(&self) -> &[Expectation] {
        &self.expectations
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Evaluate every expectation, never short-circuiting.
    pub fn evaluate(&self, request: &RequestValues) -> MatchResult {
        let mut weight = 0;
        let mut mismatches = Vec::new();

        for expectation in &self.expectations {
            match expectation.evaluate(request) {
                Ok(outcome) if outcome.pass => weight += expectation.weight,
                Ok(outcome) => mismatches.push(self.mismatch(
                    expectation.matcher.name(),
                    expectation.label(),
                    outcome.message,
                )),
                Err(e) => mismatches.push(self.mismatch(
                    expectation.matcher.name(),
                    expectation.label(),
                    e.to_string(),
                )),
            }
        }

        MatchResult {
            matched: mismatches.is_empty(),
            weight,
            mismatches,
        }
    }

    pub(crate) fn mismatch(
        &self,
        matcher: &str,
        target: String,
        reason: String,
    ) -> MismatchDetail {
        MismatchDetail {
            mock_id: self.id.clone(),
            mock_name: self.name.clone(),
            matcher: matcher.to_string(),
            target,
            reason,
        }
    }

    /// Reserve one hit. Fails once the repetition limit is reached, so
    /// concurrent requests can never serve more than `limit` responses.
    pub(crate) fn try_claim(&self) -> bool {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.hits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |hits| {
                (hits < limit).then_some(hits + 1)
            })
            .is_ok()
    }

    /// Give back a hit claimed for a dispatch that failed.
    pub(crate) fn release(&self) {
        let _ = self
            .hits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |hits| hits.checked_sub(1));
    }

    /// Run the post-serve hooks of every matcher. Errors are returned for
    /// logging only.
    pub(crate) fn on_served(&self) -> Vec<(String, MatchError)> {
        self.expectations
            .iter()
            .filter_map(|e| e.matcher.on_mock_served().err().map(|err| (e.label(), err)))
            .collect()
    }
}

impl fmt::Debug for Mock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mock")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority())
            .field("enabled", &self.is_enabled())
            .field("hits", &self.hits())
            .field("limit", &self.limit)
            .field("source", &self.source)
            .field("expectations", &self.expectations)
            .finish()
    }
}
