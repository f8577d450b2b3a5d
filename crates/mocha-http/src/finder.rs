//! Weighted mock lookup.
//!
//! Mocks are tried in priority order. The first mock whose expectations all
//! pass, and that can still claim a hit, wins. Otherwise the mock with the
//! strictly highest passing weight is reported as the closest match,
//! together with every mismatch seen along the way.

use std::sync::Arc;

use tracing::trace;

use crate::mock::{MismatchDetail, Mock};
use crate::request::RequestValues;

#[derive(Debug, Default)]
pub struct FindResult {
    pub matched: bool,
    pub mock: Option<Arc<Mock>>,
    /// Only set when nothing matched and some mock scored above zero.
    pub closest: Option<Arc<Mock>>,
    pub mismatches: Vec<MismatchDetail>,
}

/// Find the mock serving `request`. A returned match has already claimed
/// one hit on the mock.
pub fn find_mock(mocks: &[Arc<Mock>], request: &RequestValues) -> FindResult {
    let mut closest: Option<&Arc<Mock>> = None;
    let mut best_weight = 0;
    let mut mismatches = Vec::new();

    for mock in mocks {
        let mut result = mock.evaluate(request);
        trace!(
            mock_id = %mock.id(),
            matched = result.matched,
            weight = result.weight,
            "Evaluated mock"
        );

        if result.matched {
            if mock.try_claim() {
                return FindResult {
                    matched: true,
                    mock: Some(mock.clone()),
                    closest: None,
                    mismatches: Vec::new(),
                };
            }
            result.mismatches.push(mock.mismatch(
                "Repeat",
                "repeat".to_string(),
                "repetition limit reached".to_string(),
            ));
        }

        if result.weight > best_weight {
            best_weight = result.weight;
            closest = Some(mock);
        }
        mismatches.append(&mut result.mismatches);
    }

    FindResult {
        matched: false,
        mock: None,
        closest: closest.cloned(),
        mismatches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MatchError;
    use crate::matcher::{eq, func, MatchInput, MatchOutcome, Matcher};
    use crate::mock::{weight, BuildContext, MockBuilder, Target};
    use serde_json::Value;
    use crate::reply::StaticReply;
    use crate::request::tests::{get, request_values};
    use bytes::Bytes;
    use hyper::Request;

    fn build(builder: MockBuilder) -> Arc<Mock> {
        Arc::new(
            builder
                .reply(StaticReply::ok())
                .build(&BuildContext::default())
                .unwrap(),
        )
    }

    fn sorted(mut mocks: Vec<Arc<Mock>>) -> Vec<Arc<Mock>> {
        mocks.sort_by_key(|m| m.priority());
        mocks
    }

    #[test]
    fn test_lower_priority_value_wins() {
        let low = build(MockBuilder::get("/test").name("low").priority(1));
        let high = build(MockBuilder::get("/test").name("high").priority(0));
        let mocks = sorted(vec![low, high]);

        let result = find_mock(&mocks, &get("/test"));
        assert!(result.matched);
        assert_eq!(result.mock.unwrap().name(), Some("high"));
    }

    #[test]
    fn test_first_match_stops_evaluation() {
        let first = build(MockBuilder::get("/x").name("first"));
        let second = build(
            MockBuilder::get("/x")
                .name("second")
                .request_matches(|_| panic!("must not be evaluated")),
        );
        let result = find_mock(&[first, second], &get("/x"));
        assert_eq!(result.mock.unwrap().name(), Some("first"));
    }

    #[test]
    fn test_closest_is_highest_weight() {
        // path (6) + header (4) vs path only (6)
        let a = build(
            MockBuilder::post("/orders")
                .name("a")
                .header("x-key", eq("foo")),
        );
        let b = build(
            MockBuilder::put("/orders")
                .name("b")
                .header("x-key", eq("foo")),
        );
        let c = build(MockBuilder::delete("/other").name("c"));
        let request = request_values(
            Request::patch("/orders")
                .header("x-key", "foo")
                .body(Bytes::new())
                .unwrap(),
        );

        let result = find_mock(&[c, a, b], &request);
        assert!(!result.matched);
        // a and b tie on weight 10, the earlier one is kept
        assert_eq!(result.closest.unwrap().name(), Some("a"));
        assert!(result.mismatches.iter().any(|m| m.mock_name.as_deref() == Some("c")));
    }

    #[test]
    fn test_no_closest_without_weight() {
        let a = build(MockBuilder::new().method("POST").name("a"));
        let result = find_mock(&[a], &get("/"));
        assert!(!result.matched);
        assert!(result.closest.is_none());
        assert_eq!(result.mismatches.len(), 1);
        assert_eq!(result.mismatches[0].target, "method");
    }

    #[test]
    fn test_erroring_matcher_is_a_mismatch() {
        let broken = build(
            MockBuilder::get("/")
                .body(func(|_, _| Err(anyhow::anyhow!("cannot decode"))))
                .name("broken"),
        );
        let fine = build(MockBuilder::get("/").name("fine"));
        let result = find_mock(&[broken, fine], &get("/"));
        assert_eq!(result.mock.unwrap().name(), Some("fine"));
    }

    struct Exploding;

    impl Matcher for Exploding {
        fn name(&self) -> &str {
            "Exploding"
        }

        fn matches(&self, _input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
            panic!("custom matcher exploded")
        }
    }

    #[test]
    fn test_panicking_matcher_is_a_mismatch() {
        let broken = build(
            MockBuilder::get("/x")
                .expect(
                    Target::Request,
                    None,
                    Arc::new(|_: &RequestValues| Value::Null),
                    Exploding,
                    weight::LOW,
                )
                .name("broken"),
        );
        let fine = build(MockBuilder::get("/x").name("fine").priority(5));

        let result = find_mock(&[broken, fine], &get("/x"));
        assert_eq!(result.mock.unwrap().name(), Some("fine"));
    }

    #[test]
    fn test_panicking_selector_is_reported() {
        let broken = build(
            MockBuilder::get("/x")
                .expect(
                    Target::Body,
                    None,
                    Arc::new(|_: &RequestValues| -> Value { panic!("selector exploded") }),
                    eq("x"),
                    weight::HIGH,
                )
                .name("broken"),
        );

        let result = find_mock(&[broken], &get("/x"));
        assert!(!result.matched);
        assert_eq!(result.mismatches.len(), 1);
        assert_eq!(result.mismatches[0].matcher, "Equal");
        assert!(result.mismatches[0].reason.contains("selector exploded"));
        assert_eq!(result.closest.unwrap().name(), Some("broken"));
    }

    #[test]
    fn test_exhausted_mock_falls_through() {
        let once = build(MockBuilder::get("/").name("once").once());
        let fallback = build(MockBuilder::get("/").name("fallback").priority(10));
        let mocks = sorted(vec![once.clone(), fallback]);

        assert_eq!(
            find_mock(&mocks, &get("/")).mock.unwrap().name(),
            Some("once")
        );
        assert_eq!(
            find_mock(&mocks, &get("/")).mock.unwrap().name(),
            Some("fallback")
        );
        assert_eq!(once.hits(), 1);
    }

    #[test]
    fn test_concurrent_claims_never_exceed_limit() {
        let mock = build(MockBuilder::get("/limited").times(7));
        let mocks = vec![mock.clone()];
        let matched = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..50 {
                scope.spawn(|| {
                    if find_mock(&mocks, &get("/limited")).matched {
                        matched.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(matched.into_inner(), 7);
        assert_eq!(mock.hits(), 7);
    }
}
