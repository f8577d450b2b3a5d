//! Equality, text and presence matchers.

use regex::Regex;
use serde_json::Value;

use super::{describe, value_text, MatchInput, MatchOutcome, Matcher};
use crate::error::MatchError;

/// Matches when the value equals the expected one. Scalars are also compared
/// by their text form, so `eq("42")` accepts the number `42`.
pub struct Equal {
    expected: Value,
}

pub fn eq(expected: impl Into<Value>) -> Equal {
    Equal {
        expected: expected.into(),
    }
}

impl Matcher for Equal {
    fn name(&self) -> &str {
        "Equal"
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let pass = input.value == &self.expected
            || match (value_text(input.value), value_text(&self.expected)) {
                (Some(actual), Some(expected)) => {
                    !input.value.is_object() && !input.value.is_array() && actual == expected
                }
                _ => false,
            };
        Ok(MatchOutcome::from_bool(pass, || {
            format!(
                "expected {} but got {}",
                describe(&self.expected),
                describe(input.value)
            )
        }))
    }
}

pub struct EqualIgnoreCase {
    expected: String,
}

pub fn eq_ignore_case(expected: impl Into<String>) -> EqualIgnoreCase {
    EqualIgnoreCase {
        expected: expected.into(),
    }
}

impl Matcher for EqualIgnoreCase {
    fn name(&self) -> &str {
        "EqualIgnoreCase"
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let pass = value_text(input.value)
            .map(|actual| actual.eq_ignore_ascii_case(&self.expected))
            .unwrap_or(false);
        Ok(MatchOutcome::from_bool(pass, || {
            format!(
                "expected \"{}\" (ignoring case) but got {}",
                self.expected,
                describe(input.value)
            )
        }))
    }
}

/// Substring for text, element for arrays, key for objects.
pub struct Contains {
    needle: String,
}

pub fn contains(needle: impl Into<String>) -> Contains {
    Contains {
        needle: needle.into(),
    }
}

impl Matcher for Contains {
    fn name(&self) -> &str {
        "Contains"
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let pass = match input.value {
            Value::Array(items) => items
                .iter()
                .any(|item| value_text(item).is_some_and(|t| t == self.needle.as_str())),
            Value::Object(map) => map.contains_key(&self.needle),
            other => value_text(other).is_some_and(|t| t.contains(self.needle.as_str())),
        };
        Ok(MatchOutcome::from_bool(pass, || {
            format!(
                "expected {} to contain \"{}\"",
                describe(input.value),
                self.needle
            )
        }))
    }
}

pub struct StartsWith {
    prefix: String,
}

pub fn starts_with(prefix: impl Into<String>) -> StartsWith {
    StartsWith {
        prefix: prefix.into(),
    }
}

impl Matcher for StartsWith {
    fn name(&self) -> &str {
        "StartsWith"
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let pass = value_text(input.value).is_some_and(|t| t.starts_with(self.prefix.as_str()));
        Ok(MatchOutcome::from_bool(pass, || {
            format!(
                "expected {} to start with \"{}\"",
                describe(input.value),
                self.prefix
            )
        }))
    }
}

pub struct EndsWith {
    suffix: String,
}

pub fn ends_with(suffix: impl Into<String>) -> EndsWith {
    EndsWith {
        suffix: suffix.into(),
    }
}

impl Matcher for EndsWith {
    fn name(&self) -> &str {
        "EndsWith"
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let pass = value_text(input.value).is_some_and(|t| t.ends_with(self.suffix.as_str()));
        Ok(MatchOutcome::from_bool(pass, || {
            format!(
                "expected {} to end with \"{}\"",
                describe(input.value),
                self.suffix
            )
        }))
    }
}

pub struct RegexMatcher {
    regex: Regex,
}

/// Takes a compiled regex so invalid patterns fail where the mock is built.
pub fn matches_regex(regex: Regex) -> RegexMatcher {
    RegexMatcher { regex }
}

impl Matcher for RegexMatcher {
    fn name(&self) -> &str {
        "Regex"
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let pass = value_text(input.value).is_some_and(|t| self.regex.is_match(&t));
        Ok(MatchOutcome::from_bool(pass, || {
            format!(
                "expected {} to match /{}/",
                describe(input.value),
                self.regex.as_str()
            )
        }))
    }
}

/// Passes when the value is present and not empty.
pub struct Present;

pub fn present() -> Present {
    Present
}

impl Matcher for Present {
    fn name(&self) -> &str {
        "Present"
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let pass = match input.value {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
            _ => true,
        };
        Ok(MatchOutcome::from_bool(pass, || {
            "expected value to be present".to_string()
        }))
    }
}

pub struct Anything;

pub fn anything() -> Anything {
    Anything
}

impl Matcher for Anything {
    fn name(&self) -> &str {
        "Anything"
    }

    fn matches(&self, _input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        Ok(MatchOutcome::pass())
    }
}

pub struct IsIn {
    candidates: Vec<Value>,
}

pub fn is_in<I, V>(candidates: I) -> IsIn
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    IsIn {
        candidates: candidates.into_iter().map(Into::into).collect(),
    }
}

impl Matcher for IsIn {
    fn name(&self) -> &str {
        "IsIn"
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let actual = value_text(input.value);
        let pass = self.candidates.iter().any(|c| {
            c == input.value || (actual.is_some() && value_text(c) == actual)
        });
        Ok(MatchOutcome::from_bool(pass, || {
            format!(
                "expected {} to be one of {}",
                describe(input.value),
                Value::Array(self.candidates.clone())
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::tests::check;
    use serde_json::json;

    #[test]
    fn test_equal() {
        assert!(check(&eq("GET"), json!("GET")).pass);
        assert!(check(&eq("42"), json!(42)).pass);
        let outcome = check(&eq("GET"), json!("POST"));
        assert!(!outcome.pass);
        assert_eq!(outcome.message, "expected \"GET\" but got \"POST\"");
        assert!(!check(&eq("x"), Value::Null).pass);
    }

    #[test]
    fn test_equal_ignore_case() {
        assert!(check(&eq_ignore_case("application/JSON"), json!("Application/json")).pass);
        assert!(!check(&eq_ignore_case("a"), json!("b")).pass);
    }

    #[test]
    fn test_contains() {
        assert!(check(&contains("ell"), json!("hello")).pass);
        assert!(check(&contains("b"), json!(["a", "b"])).pass);
        assert!(check(&contains("id"), json!({"id": 1})).pass);
        assert!(!check(&contains("zz"), json!("hello")).pass);
        assert!(!check(&contains("zz"), Value::Null).pass);
    }

    #[test]
    fn test_prefix_suffix() {
        assert!(check(&starts_with("/api"), json!("/api/users")).pass);
        assert!(!check(&starts_with("/api"), json!("/v1/api")).pass);
        assert!(check(&ends_with(".json"), json!("file.json")).pass);
    }

    #[test]
    fn test_regex() {
        let m = matches_regex(Regex::new(r"^/users/\d+$").unwrap());
        assert!(check(&m, json!("/users/12")).pass);
        let outcome = check(&m, json!("/users/me"));
        assert!(outcome.message.contains("/users/me"));
    }

    #[test]
    fn test_present_and_anything() {
        assert!(check(&present(), json!("x")).pass);
        assert!(!check(&present(), json!("")).pass);
        assert!(!check(&present(), Value::Null).pass);
        assert!(check(&anything(), Value::Null).pass);
    }

    #[test]
    fn test_is_in() {
        let m = is_in(["GET", "HEAD"]);
        assert!(check(&m, json!("HEAD")).pass);
        assert!(!check(&m, json!("POST")).pass);
        assert!(check(&is_in([1, 2]), json!("2")).pass);
    }
}
