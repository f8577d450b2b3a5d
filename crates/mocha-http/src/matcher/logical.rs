//! Composite matchers.

use super::{MatchInput, MatchOutcome, Matcher};
use crate::error::MatchError;

pub struct Not {
    inner: Box<dyn Matcher>,
}

pub fn not(inner: impl Matcher + 'static) -> Not {
    Not {
        inner: Box::new(inner),
    }
}

impl Matcher for Not {
    fn name(&self) -> &str {
        "Not"
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let outcome = self.inner.matches(input)?;
        Ok(MatchOutcome::from_bool(!outcome.pass, || {
            format!("expected {} not to pass", self.inner.name())
        }))
    }
}

/// Passes when every inner matcher passes. Failure messages are joined.
pub struct AllOf {
    matchers: Vec<Box<dyn Matcher>>,
}

pub fn all_of(matchers: Vec<Box<dyn Matcher>>) -> AllOf {
    AllOf { matchers }
}

impl Matcher for AllOf {
    fn name(&self) -> &str {
        "AllOf"
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let mut failures = Vec::new();
        for matcher in &self.matchers {
            let outcome = matcher.matches(input)?;
            if !outcome.pass {
                failures.push(outcome.message);
            }
        }
        Ok(MatchOutcome::from_bool(failures.is_empty(), || {
            failures.join("; ")
        }))
    }

    fn on_mock_served(&self) -> Result<(), MatchError> {
        self.matchers.iter().try_for_each(|m| m.on_mock_served())
    }
}

pub struct AnyOf {
    matchers: Vec<Box<dyn Matcher>>,
}

pub fn any_of(matchers: Vec<Box<dyn Matcher>>) -> AnyOf {
    AnyOf { matchers }
}

impl Matcher for AnyOf {
    fn name(&self) -> &str {
        "AnyOf"
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let mut failures = Vec::new();
        for matcher in &self.matchers {
            let outcome = matcher.matches(input)?;
            if outcome.pass {
                return Ok(MatchOutcome::pass());
            }
            failures.push(outcome.message);
        }
        Ok(MatchOutcome::fail(format!(
            "none of the matchers passed: {}",
            failures.join("; ")
        )))
    }
}
