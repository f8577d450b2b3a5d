//! Fluent builder for mocks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use super::types::{
    weight, BoundPostAction, Callback, Expectation, Mapper, Mock, PostAction, ServedContext,
    Target, ValueSelector,
};
use crate::error::MockError;
use crate::matcher::{eq, eq_ignore_case, func, Matcher, Repeat};
use crate::reply::{Reply, ResponseStub};
use crate::request::RequestValues;
use crate::scenario::{scenario_value, ScenarioMatcher, ScenarioRegistry, SCENARIO_STARTED};
use crate::template::{PlaceholderEngine, TemplateEngine};

/// Collaborators a mock needs while it is being built.
#[derive(Clone)]
pub struct BuildContext {
    pub scenarios: Arc<ScenarioRegistry>,
    pub templates: Arc<dyn TemplateEngine>,
    /// Extra data exposed to templates as `ext`.
    pub template_data: Value,
    pub post_actions: HashMap<String, Arc<dyn PostAction>>,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self {
            scenarios: Arc::new(ScenarioRegistry::new()),
            templates: Arc::new(PlaceholderEngine),
            template_data: Value::Null,
            post_actions: HashMap::new(),
        }
    }
}

/// Builds a [`Mock`]. Expectations are evaluated in the order they are
/// added.
///
/// ```ignore
/// let mock = MockBuilder::get("/users/1")
///     .header("accept", contains("json"))
///     .reply(StaticReply::ok().json(json!({"id": 1})));
/// server.add(mock)?;
/// ```
pub struct MockBuilder {
    name: Option<String>,
    priority: i64,
    enabled: bool,
    expectations: Vec<Expectation>,
    reply: Option<Box<dyn Reply>>,
    limit: Option<usize>,
    source: Option<String>,
    delay: Option<Duration>,
    mappers: Vec<Mapper>,
    callbacks: Vec<Callback>,
    post_actions: Vec<(String, Value)>,
    scenario: Option<String>,
    scenario_required_state: Option<String>,
    scenario_new_state: Option<String>,
}

impl std::fmt::Debug for MockBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBuilder")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("limit", &self.limit)
            .field("source", &self.source)
            .field("expectations", &self.expectations)
            .finish_non_exhaustive()
    }
}

impl Default for MockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn multi_value(values: Vec<String>) -> Value {
    match values.len() {
        0 => Value::Null,
        1 => values.into_iter().next().map(Value::String).unwrap_or(Value::Null),
        _ => Value::Array(values.into_iter().map(Value::String).collect()),
    }
}

impl MockBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            priority: 0,
            enabled: true,
            expectations: Vec::new(),
            reply: None,
            limit: None,
            source: None,
            delay: None,
            mappers: Vec::new(),
            callbacks: Vec::new(),
            post_actions: Vec::new(),
            scenario: None,
            scenario_required_state: None,
            scenario_new_state: None,
        }
    }

    fn method_and_path(method: &str, path: &str) -> Self {
        Self::new().method(method).path(path)
    }

    pub fn get(path: &str) -> Self {
        Self::method_and_path("GET", path)
    }

    pub fn post(path: &str) -> Self {
        Self::method_and_path("POST", path)
    }

    pub fn put(path: &str) -> Self {
        Self::method_and_path("PUT", path)
    }

    pub fn patch(path: &str) -> Self {
        Self::method_and_path("PATCH", path)
    }

    pub fn delete(path: &str) -> Self {
        Self::method_and_path("DELETE", path)
    }

    pub fn head(path: &str) -> Self {
        Self::method_and_path("HEAD", path)
    }

    pub fn options(path: &str) -> Self {
        Self::method_and_path("OPTIONS", path)
    }

    /// Match `path` with any method.
    pub fn any_method(path: &str) -> Self {
        Self::new().path(path)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Lower values are evaluated first.
    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Origin tag used to bulk delete mocks loaded from the same place.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Add an arbitrary expectation.
    pub fn expect(
        mut self,
        target: Target,
        key: Option<String>,
        selector: ValueSelector,
        matcher: impl Matcher + 'static,
        weight: u32,
    ) -> Self {
        self.expectations.push(Expectation::new(
            target,
            key,
            selector,
            Box::new(matcher),
            weight,
        ));
        self
    }

    pub fn method(self, method: &str) -> Self {
        self.method_matches(eq_ignore_case(method))
    }

    pub fn method_matches(self, matcher: impl Matcher + 'static) -> Self {
        self.expect(
            Target::Method,
            None,
            Arc::new(|r: &RequestValues| Value::String(r.method.as_str().to_string())),
            matcher,
            weight::NONE,
        )
    }

    pub fn scheme(self, matcher: impl Matcher + 'static) -> Self {
        self.expect(
            Target::Scheme,
            None,
            Arc::new(|r: &RequestValues| Value::String(r.scheme.clone())),
            matcher,
            weight::VERY_LOW,
        )
    }

    /// Matches against the absolute request URL, query included.
    pub fn url(self, matcher: impl Matcher + 'static) -> Self {
        self.expect(
            Target::Url,
            None,
            Arc::new(|r: &RequestValues| Value::String(r.url.clone())),
            matcher,
            weight::REGULAR,
        )
    }

    /// Exact path match.
    pub fn path(self, path: &str) -> Self {
        self.path_matches(eq(path))
    }

    pub fn path_matches(self, matcher: impl Matcher + 'static) -> Self {
        self.expect(
            Target::Path,
            None,
            Arc::new(|r: &RequestValues| Value::String(r.path.clone())),
            matcher,
            weight::REGULAR,
        )
    }

    /// Header values are selected as a string, or an array of strings when
    /// the header repeats. A missing header selects `null`.
    pub fn header(self, name: &str, matcher: impl Matcher + 'static) -> Self {
        let key = name.to_ascii_lowercase();
        let lookup = key.clone();
        self.expect(
            Target::Header,
            Some(key),
            Arc::new(move |r: &RequestValues| {
                multi_value(
                    r.headers
                        .get_all(lookup.as_str())
                        .iter()
                        .filter_map(|v| v.to_str().ok().map(str::to_string))
                        .collect(),
                )
            }),
            matcher,
            weight::LOW,
        )
    }

    pub fn query(self, name: &str, matcher: impl Matcher + 'static) -> Self {
        let lookup = name.to_string();
        self.expect(
            Target::Query,
            Some(name.to_string()),
            Arc::new(move |r: &RequestValues| {
                multi_value(r.query.get(&lookup).cloned().unwrap_or_default())
            }),
            matcher,
            weight::VERY_LOW,
        )
    }

    pub fn form_field(self, name: &str, matcher: impl Matcher + 'static) -> Self {
        let lookup = name.to_string();
        self.expect(
            Target::Form,
            Some(name.to_string()),
            Arc::new(move |r: &RequestValues| {
                multi_value(r.form.get(&lookup).cloned().unwrap_or_default())
            }),
            matcher,
            weight::VERY_LOW,
        )
    }

    /// Matches the parsed body, or the raw body text when no parser handled
    /// it.
    pub fn body(self, matcher: impl Matcher + 'static) -> Self {
        self.expect(
            Target::Body,
            None,
            Arc::new(|r: &RequestValues| match &r.body {
                Some(value) => value.clone(),
                None if r.raw_body.is_empty() => Value::Null,
                None => Value::String(r.body_text()),
            }),
            matcher,
            weight::HIGH,
        )
    }

    /// Closure over the whole request.
    pub fn request_matches<F>(self, f: F) -> Self
    where
        F: Fn(&RequestValues) -> bool + Send + Sync + 'static,
    {
        self.expect(
            Target::Request,
            None,
            Arc::new(|_: &RequestValues| Value::Null),
            func(move |_, r| Ok(f(r))).named("RequestMatches"),
            weight::LOW,
        )
    }

    /// Serve at most `times` responses.
    pub fn times(mut self, times: usize) -> Self {
        self.limit = Some(times);
        self
    }

    pub fn once(self) -> Self {
        self.times(1)
    }

    /// Gate on a scenario in its initial state.
    pub fn start_scenario(mut self, name: impl Into<String>) -> Self {
        self.scenario = Some(name.into());
        self.scenario_required_state = Some(SCENARIO_STARTED.to_string());
        self
    }

    pub fn scenario_is(mut self, name: impl Into<String>) -> Self {
        self.scenario = Some(name.into());
        self
    }

    pub fn scenario_state_is(mut self, state: impl Into<String>) -> Self {
        self.scenario_required_state = Some(state.into());
        self
    }

    /// State the scenario moves to once this mock has served.
    pub fn scenario_state_will_be(mut self, state: impl Into<String>) -> Self {
        self.scenario_new_state = Some(state.into());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Rewrite the built response. Mappers run in registration order.
    pub fn map<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&RequestValues, &mut ResponseStub) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.mappers.push(Arc::new(mapper));
        self
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ServedContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }

    /// Run the post action registered on the server under `name`.
    pub fn post_action(mut self, name: impl Into<String>, params: Value) -> Self {
        self.post_actions.push((name.into(), params));
        self
    }

    pub fn reply(mut self, reply: impl Reply + 'static) -> Self {
        self.reply = Some(Box::new(reply));
        self
    }

    pub fn build(self, ctx: &BuildContext) -> Result<Mock, MockError> {
        if self.expectations.is_empty() {
            return Err(MockError::NoExpectations);
        }
        let mut reply = self.reply.ok_or(MockError::NoReply)?;
        reply.prepare(ctx)?;

        let mut expectations = self.expectations;
        let hits = Arc::new(AtomicUsize::new(0));

        if let Some(limit) = self.limit {
            expectations.push(Expectation::new(
                Target::Repeat,
                None,
                Arc::new(|_: &RequestValues| Value::Null),
                Box::new(Repeat::new(hits.clone(), limit)),
                weight::NONE,
            ));
        }

        match self.scenario {
            Some(name) => {
                let required = self
                    .scenario_required_state
                    .unwrap_or_else(|| SCENARIO_STARTED.to_string());
                let selected = scenario_value(&name);
                expectations.push(Expectation::new(
                    Target::Scenario,
                    Some(name.clone()),
                    Arc::new(move |_: &RequestValues| selected.clone()),
                    Box::new(ScenarioMatcher::new(
                        ctx.scenarios.clone(),
                        name,
                        required,
                        self.scenario_new_state,
                    )),
                    weight::NONE,
                ));
            }
            None if self.scenario_required_state.is_some() || self.scenario_new_state.is_some() => {
                return Err(MockError::ScenarioWithoutName);
            }
            None => {}
        }

        let post_actions = self
            .post_actions
            .into_iter()
            .map(|(name, params)| match ctx.post_actions.get(&name) {
                Some(action) => Ok(BoundPostAction {
                    name,
                    params,
                    action: action.clone(),
                }),
                None => Err(MockError::UnknownPostAction(name)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Mock {
            id: uuid::Uuid::new_v4().to_string(),
            name: self.name,
            priority: AtomicI64::new(self.priority),
            enabled: AtomicBool::new(self.enabled),
            expectations,
            reply,
            hits,
            limit: self.limit,
            source: self.source,
            delay: self.delay,
            mappers: self.mappers,
            callbacks: self.callbacks,
            post_actions,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::contains;
    use crate::reply::StaticReply;
    use crate::request::tests::{get, request_values};
    use bytes::Bytes;
    use hyper::Request;

    #[test]
    fn test_build_requires_expectations() {
        let err = MockBuilder::new()
            .reply(StaticReply::ok())
            .build(&BuildContext::default())
            .unwrap_err();
        assert!(matches!(err, MockError::NoExpectations));
    }

    #[test]
    fn test_build_requires_reply() {
        let err = MockBuilder::get("/")
            .build(&BuildContext::default())
            .unwrap_err();
        assert!(matches!(err, MockError::NoReply));
    }

    #[test]
    fn test_scenario_only_is_not_enough() {
        let err = MockBuilder::new()
            .start_scenario("flow")
            .reply(StaticReply::ok())
            .build(&BuildContext::default())
            .unwrap_err();
        assert!(matches!(err, MockError::NoExpectations));
    }

    #[test]
    fn test_scenario_state_without_name() {
        let err = MockBuilder::get("/")
            .scenario_state_is("two")
            .reply(StaticReply::ok())
            .build(&BuildContext::default())
            .unwrap_err();
        assert!(matches!(err, MockError::ScenarioWithoutName));
    }

    #[test]
    fn test_unknown_post_action() {
        let err = MockBuilder::get("/")
            .post_action("notify", Value::Null)
            .reply(StaticReply::ok())
            .build(&BuildContext::default())
            .unwrap_err();
        assert!(matches!(err, MockError::UnknownPostAction(name) if name == "notify"));
    }

    #[test]
    fn test_weights_and_labels() {
        let mock = MockBuilder::get("/users")
            .header("X-Key", eq("foo"))
            .query("page", eq("1"))
            .times(2)
            .start_scenario("flow")
            .reply(StaticReply::ok())
            .build(&BuildContext::default())
            .unwrap();

        let labels: Vec<_> = mock.expectations().iter().map(|e| e.label()).collect();
        assert_eq!(
            labels,
            vec![
                "method",
                "path",
                "header(x-key)",
                "query(page)",
                "repeat",
                "scenario(flow)"
            ]
        );
        let weights: Vec<_> = mock.expectations().iter().map(|e| e.weight).collect();
        assert_eq!(weights, vec![0, 6, 4, 2, 0, 0]);
        assert_eq!(mock.limit(), Some(2));
        assert!(!mock.id().is_empty());
    }

    #[test]
    fn test_evaluate_collects_every_mismatch() {
        let mock = MockBuilder::post("/orders")
            .header("x-key", eq("foo"))
            .reply(StaticReply::ok())
            .build(&BuildContext::default())
            .unwrap();

        let result = mock.evaluate(&get("/orders"));
        assert!(!result.matched);
        assert_eq!(result.weight, 6);
        let targets: Vec<_> = result.mismatches.iter().map(|m| m.target.as_str()).collect();
        assert_eq!(targets, vec!["method", "header(x-key)"]);

        let again = mock.evaluate(&get("/orders"));
        assert_eq!(result, again);
    }

    #[test]
    fn test_multi_value_header_selection() {
        let mock = MockBuilder::new()
            .header("accept", contains("text/html"))
            .reply(StaticReply::ok())
            .build(&BuildContext::default())
            .unwrap();
        let request = request_values(
            Request::get("/")
                .header("accept", "application/json")
                .header("accept", "text/html")
                .body(Bytes::new())
                .unwrap(),
        );
        assert!(mock.evaluate(&request).matched);
    }

    #[test]
    fn test_request_closure_panic_is_a_mismatch() {
        let mock = MockBuilder::get("/")
            .request_matches(|_| panic!("closure exploded"))
            .reply(StaticReply::ok())
            .build(&BuildContext::default())
            .unwrap();
        let result = mock.evaluate(&get("/"));
        assert!(!result.matched);
        assert!(result.mismatches[0].reason.contains("closure exploded"));
        assert_eq!(result.weight, 6);
    }

    #[test]
    fn test_claim_respects_limit() {
        let mock = MockBuilder::get("/")
            .times(2)
            .reply(StaticReply::ok())
            .build(&BuildContext::default())
            .unwrap();
        assert!(mock.try_claim());
        assert!(mock.try_claim());
        assert!(!mock.try_claim());
        assert_eq!(mock.hits(), 2);
        mock.release();
        assert_eq!(mock.hits(), 1);
        assert!(mock.try_claim());
    }

    #[test]
    fn test_any_method() {
        let mock = MockBuilder::any_method("/any")
            .reply(StaticReply::ok())
            .build(&BuildContext::default())
            .unwrap();
        let post = request_values(Request::post("/any").body(Bytes::new()).unwrap());
        assert!(mock.evaluate(&get("/any")).matched);
        assert!(mock.evaluate(&post).matched);
        assert!(!mock.evaluate(&get("/other")).matched);
    }
}
