//! Scenario state machine.
//!
//! A scenario is a named, free-form state string shared by the mocks of a
//! multi-step flow. Mocks gate on the current state through
//! [`ScenarioMatcher`] and move the flow forward once they have served.
//!
//! The registry is owned by the server and handed to every mock builder, so
//! two servers in the same process never share flows.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::MatchError;
use crate::matcher::{MatchInput, MatchOutcome, Matcher};

/// State of every scenario on first touch.
pub const SCENARIO_STARTED: &str = "STARTED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub name: String,
    pub state: String,
}

/// Named scenario states guarded by one lock.
#[derive(Debug, Default)]
pub struct ScenarioRegistry {
    states: Mutex<HashMap<String, String>>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the scenario in the `STARTED` state unless it already exists.
    /// Returns the current state.
    pub fn create_if_absent(&self, name: &str) -> String {
        let mut states = self.states.lock();
        states
            .entry(name.to_string())
            .or_insert_with(|| SCENARIO_STARTED.to_string())
            .clone()
    }

    pub fn state(&self, name: &str) -> Option<String> {
        self.states.lock().get(name).cloned()
    }

    pub fn set_state(&self, name: &str, state: impl Into<String>) {
        self.states.lock().insert(name.to_string(), state.into());
    }

    /// Move `name` from `from` to `to`. Fails without changing anything when
    /// the scenario is in another state. An absent scenario counts as
    /// `STARTED`.
    pub fn transition(&self, name: &str, from: &str, to: &str) -> bool {
        let mut states = self.states.lock();
        let current = states
            .get(name)
            .map(String::as_str)
            .unwrap_or(SCENARIO_STARTED);
        if current != from {
            return false;
        }
        states.insert(name.to_string(), to.to_string());
        true
    }

    pub fn remove(&self, name: &str) -> bool {
        self.states.lock().remove(name).is_some()
    }

    pub fn reset(&self) {
        self.states.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All scenarios sorted by name.
    pub fn snapshot(&self) -> Vec<Scenario> {
        let mut scenarios: Vec<Scenario> = self
            .states
            .lock()
            .iter()
            .map(|(name, state)| Scenario {
                name: name.clone(),
                state: state.clone(),
            })
            .collect();
        scenarios.sort_by(|a, b| a.name.cmp(&b.name));
        scenarios
    }
}

/// Passes while the scenario is in `required_state`. The transition to
/// `new_state` is applied by [`Matcher::on_mock_served`], so a request that
/// fails on another expectation never moves the flow.
pub struct ScenarioMatcher {
    registry: Arc<ScenarioRegistry>,
    name: String,
    required_state: String,
    new_state: Option<String>,
}

impl ScenarioMatcher {
    pub fn new(
        registry: Arc<ScenarioRegistry>,
        name: impl Into<String>,
        required_state: impl Into<String>,
        new_state: Option<String>,
    ) -> Self {
        Self {
            registry,
            name: name.into(),
            required_state: required_state.into(),
            new_state: new_state.filter(|s| !s.is_empty()),
        }
    }
}

impl Matcher for ScenarioMatcher {
    fn name(&self) -> &str {
        "Scenario"
    }

    fn matches(&self, _input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let current = if self.required_state == SCENARIO_STARTED {
            self.registry.create_if_absent(&self.name)
        } else {
            self.registry
                .state(&self.name)
                .unwrap_or_else(|| SCENARIO_STARTED.to_string())
        };

        Ok(MatchOutcome::from_bool(current == self.required_state, || {
            format!(
                "scenario \"{}\" is in state \"{}\", required \"{}\"",
                self.name, current, self.required_state
            )
        }))
    }

    fn on_mock_served(&self) -> Result<(), MatchError> {
        let Some(new_state) = &self.new_state else {
            return Ok(());
        };
        if self
            .registry
            .transition(&self.name, &self.required_state, new_state)
        {
            debug!(
                scenario = %self.name,
                from = %self.required_state,
                to = %new_state,
                "Scenario transitioned"
            );
            Ok(())
        } else {
            Err(MatchError::failed(
                "Scenario",
                format!(
                    "scenario \"{}\" left state \"{}\" before the transition to \"{}\"",
                    self.name, self.required_state, new_state
                ),
            ))
        }
    }
}

/// Selected value for scenario expectations: the scenario name.
pub(crate) fn scenario_value(name: &str) -> Value {
    Value::String(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::tests::check;

    #[test]
    fn test_create_if_absent_is_idempotent() {
        let registry = ScenarioRegistry::new();
        assert_eq!(registry.create_if_absent("checkout"), SCENARIO_STARTED);
        registry.set_state("checkout", "paid");
        assert_eq!(registry.create_if_absent("checkout"), "paid");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_transition_is_compare_and_set() {
        let registry = ScenarioRegistry::new();
        assert!(registry.transition("flow", SCENARIO_STARTED, "step-2"));
        assert!(!registry.transition("flow", SCENARIO_STARTED, "step-3"));
        assert_eq!(registry.state("flow").as_deref(), Some("step-2"));
    }

    #[test]
    fn test_matcher_creates_and_transitions_after_serve() {
        let registry = Arc::new(ScenarioRegistry::new());
        let m = ScenarioMatcher::new(
            registry.clone(),
            "login",
            SCENARIO_STARTED,
            Some("logged-in".to_string()),
        );

        assert!(check(&m, scenario_value("login")).pass);
        assert_eq!(registry.state("login").as_deref(), Some(SCENARIO_STARTED));

        m.on_mock_served().unwrap();
        assert_eq!(registry.state("login").as_deref(), Some("logged-in"));

        let outcome = check(&m, scenario_value("login"));
        assert!(!outcome.pass);
        assert!(outcome.message.contains("logged-in"));
    }

    #[test]
    fn test_non_started_requirement_does_not_create() {
        let registry = Arc::new(ScenarioRegistry::new());
        let m = ScenarioMatcher::new(registry.clone(), "flow", "step-2", None);
        assert!(!check(&m, scenario_value("flow")).pass);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_first_touch_creates_once() {
        let registry = Arc::new(ScenarioRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.create_if_absent("race"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), SCENARIO_STARTED);
        }
        assert_eq!(registry.snapshot().len(), 1);
    }
}
