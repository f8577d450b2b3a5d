//! Predicates evaluated against values selected from a request.
//!
//! Every expectation of a mock owns one [`Matcher`]. Matchers are pure with
//! respect to the request: they get a selected value plus the full request
//! snapshot and report pass/fail with a human readable reason.
//!
//! Supported matchers:
//! - equality: `eq`, `eq_ignore_case`, `is_in`, `eq_json`
//! - text: `contains`, `starts_with`, `ends_with`, `matches_regex`
//! - presence: `present`, `anything`
//! - composition: `not`, `all_of`, `any_of`
//! - structure: `json_path`
//! - closures: `func`
//! - repetition: [`Repeat`], installed by `times(n)`

mod func;
mod json;
mod logical;
mod repeat;
mod string;

use std::borrow::Cow;

use serde_json::Value;

use crate::error::MatchError;
use crate::request::RequestValues;

pub use func::{func, FuncMatcher};
pub use json::{eq_json, json_path, EqualJson, JsonPathMatcher};
pub use logical::{all_of, any_of, not, AllOf, AnyOf, Not};
pub use repeat::Repeat;
pub use string::{
    anything, contains, ends_with, eq, eq_ignore_case, is_in, matches_regex, present, starts_with,
    Anything, Contains, EndsWith, Equal, EqualIgnoreCase, IsIn, Present, RegexMatcher, StartsWith,
};

/// Input handed to a matcher.
pub struct MatchInput<'a> {
    /// Value selected from the request by the owning expectation.
    pub value: &'a Value,
    pub request: &'a RequestValues,
}

/// Result of a successful evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub pass: bool,
    /// Explanation shown in mismatch reports when `pass` is false.
    pub message: String,
}

impl MatchOutcome {
    pub fn pass() -> Self {
        Self {
            pass: true,
            message: String::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            pass: false,
            message: message.into(),
        }
    }

    pub fn from_bool(pass: bool, message: impl FnOnce() -> String) -> Self {
        if pass {
            Self::pass()
        } else {
            Self::fail(message())
        }
    }
}

pub trait Matcher: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError>;

    /// Runs after the owning mock has served a response.
    fn on_mock_served(&self) -> Result<(), MatchError> {
        Ok(())
    }
}

impl<M: Matcher + ?Sized> Matcher for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        (**self).matches(input)
    }

    fn on_mock_served(&self) -> Result<(), MatchError> {
        (**self).on_mock_served()
    }
}

/// Convenience conversion into a boxed matcher for the composite matchers.
pub trait MatcherExt: Matcher + Sized + 'static {
    fn boxed(self) -> Box<dyn Matcher> {
        Box::new(self)
    }
}

impl<M: Matcher + Sized + 'static> MatcherExt for M {}

/// Text view of a selected value. `null` has no text.
pub(crate) fn value_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        other => Some(Cow::Owned(other.to_string())),
    }
}

/// Compact rendering of a value for mismatch messages.
pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::request::tests::get;

    /// Evaluate a matcher against a plain value with a dummy request.
    pub(crate) fn check(matcher: &dyn Matcher, value: Value) -> MatchOutcome {
        let request = get("/");
        matcher
            .matches(&MatchInput {
                value: &value,
                request: &request,
            })
            .unwrap()
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&Value::Null), None);
        assert_eq!(value_text(&Value::from("a")).unwrap(), "a");
        assert_eq!(value_text(&Value::from(12)).unwrap(), "12");
        assert_eq!(value_text(&Value::from(true)).unwrap(), "true");
    }

    #[test]
    fn test_boxed_matcher_delegates() {
        let m: Box<dyn Matcher> = eq("x").boxed();
        assert_eq!(m.name(), "Equal");
        assert!(check(&m, Value::from("x")).pass);
    }
}
