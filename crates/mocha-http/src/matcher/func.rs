//! Matchers backed by caller supplied closures.

use serde_json::Value;

use super::{describe, MatchInput, MatchOutcome, Matcher};
use crate::error::MatchError;
use crate::request::RequestValues;

type MatchFn = dyn Fn(&Value, &RequestValues) -> anyhow::Result<bool> + Send + Sync;

/// Runs a closure against the selected value and the request. Errors raised
/// by the closure become matcher errors.
pub struct FuncMatcher {
    name: String,
    f: Box<MatchFn>,
}

pub fn func<F>(f: F) -> FuncMatcher
where
    F: Fn(&Value, &RequestValues) -> anyhow::Result<bool> + Send + Sync + 'static,
{
    FuncMatcher {
        name: "Func".to_string(),
        f: Box::new(f),
    }
}

impl FuncMatcher {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Matcher for FuncMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        match (self.f)(input.value, input.request) {
            Ok(pass) => Ok(MatchOutcome::from_bool(pass, || {
                format!("{} rejected {}", self.name, describe(input.value))
            })),
            Err(e) => Err(MatchError::failed(&self.name, e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::tests::check;
    use crate::request::tests::get;
    use serde_json::json;

    #[test]
    fn test_func_pass_and_fail() {
        let m = func(|v, _| Ok(v.as_i64().is_some_and(|n| n > 10)));
        assert!(check(&m, json!(11)).pass);
        assert!(!check(&m, json!(3)).pass);
    }

    #[test]
    fn test_func_error() {
        let m = func(|_, _| Err(anyhow::anyhow!("no database"))).named("CheckDb");
        let request = get("/");
        let err = m
            .matches(&MatchInput {
                value: &Value::Null,
                request: &request,
            })
            .unwrap_err();
        assert_eq!(err, MatchError::failed("CheckDb", "no database"));
    }
}
