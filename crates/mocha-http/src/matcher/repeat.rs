//! Repetition gate used by `times(n)`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{MatchInput, MatchOutcome, Matcher};
use crate::error::MatchError;

/// Fails once the owning mock has served `limit` responses. Shares the hit
/// counter with the mock; the authoritative check is the mock's atomic claim,
/// this matcher only makes the limit visible in mismatch reports.
pub struct Repeat {
    hits: Arc<AtomicUsize>,
    limit: usize,
}

impl Repeat {
    pub(crate) fn new(hits: Arc<AtomicUsize>, limit: usize) -> Self {
        Self { hits, limit }
    }
}

impl Matcher for Repeat {
    fn name(&self) -> &str {
        "Repeat"
    }

    fn matches(&self, _input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let hits = self.hits.load(Ordering::Acquire);
        Ok(MatchOutcome::from_bool(hits < self.limit, || {
            format!(
                "mock already served {hits} of {} allowed responses",
                self.limit
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::tests::check;
    use serde_json::Value;

    #[test]
    fn test_repeat_limit() {
        let hits = Arc::new(AtomicUsize::new(0));
        let m = Repeat::new(hits.clone(), 2);
        assert!(check(&m, Value::Null).pass);
        hits.store(2, Ordering::Release);
        let outcome = check(&m, Value::Null);
        assert!(!outcome.pass);
        assert!(outcome.message.contains("2 of 2"));
    }
}
