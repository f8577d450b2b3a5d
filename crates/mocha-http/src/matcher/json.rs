//! Structural matchers over JSON values.

use serde_json::Value;
use serde_json_path::JsonPath;

use super::{describe, MatchInput, MatchOutcome, Matcher};
use crate::error::MatchError;

/// Selects nodes with an RFC 9535 JSONPath expression and hands them to an
/// inner matcher. No node selects `null`, one node selects the node itself
/// and several nodes select an array.
pub struct JsonPathMatcher {
    source: String,
    path: JsonPath,
    inner: Box<dyn Matcher>,
}

pub fn json_path(
    path: &str,
    inner: impl Matcher + 'static,
) -> Result<JsonPathMatcher, serde_json_path::ParseError> {
    Ok(JsonPathMatcher {
        source: path.to_string(),
        path: JsonPath::parse(path)?,
        inner: Box::new(inner),
    })
}

impl Matcher for JsonPathMatcher {
    fn name(&self) -> &str {
        "JsonPath"
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let parsed;
        let document = match input.value {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(v) => {
                    parsed = v;
                    &parsed
                }
                Err(_) => input.value,
            },
            other => other,
        };

        let nodes = self.path.query(document).all();
        let selected = match nodes.len() {
            0 => Value::Null,
            1 => nodes[0].clone(),
            _ => Value::Array(nodes.into_iter().cloned().collect()),
        };

        let outcome = self.inner.matches(&MatchInput {
            value: &selected,
            request: input.request,
        })?;
        if outcome.pass {
            Ok(outcome)
        } else {
            Ok(MatchOutcome::fail(format!(
                "at {}: {}",
                self.source, outcome.message
            )))
        }
    }
}

/// Deep JSON equality. A string value is parsed as JSON before comparing.
pub struct EqualJson {
    expected: Value,
}

pub fn eq_json(expected: impl Into<Value>) -> EqualJson {
    EqualJson {
        expected: expected.into(),
    }
}

impl Matcher for EqualJson {
    fn name(&self) -> &str {
        "EqualJson"
    }

    fn matches(&self, input: &MatchInput<'_>) -> Result<MatchOutcome, MatchError> {
        let pass = match input.value {
            Value::String(s) if !self.expected.is_string() => serde_json::from_str::<Value>(s)
                .map(|v| v == self.expected)
                .unwrap_or(false),
            other => other == &self.expected,
        };
        Ok(MatchOutcome::from_bool(pass, || {
            format!(
                "expected JSON {} but got {}",
                self.expected,
                describe(input.value)
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::tests::check;
    use crate::matcher::{contains, eq, present};
    use serde_json::json;

    #[test]
    fn test_json_path_single_node() {
        let m = json_path("$.user.name", eq("jane")).unwrap();
        assert!(check(&m, json!({"user": {"name": "jane"}})).pass);

        let outcome = check(&m, json!({"user": {"name": "john"}}));
        assert!(!outcome.pass);
        assert!(outcome.message.starts_with("at $.user.name"));
    }

    #[test]
    fn test_json_path_missing_node_is_null() {
        let m = json_path("$.missing", present()).unwrap();
        assert!(!check(&m, json!({"a": 1})).pass);
    }

    #[test]
    fn test_json_path_many_nodes() {
        let m = json_path("$.items[*].sku", contains("B-2")).unwrap();
        assert!(check(&m, json!({"items": [{"sku": "A-1"}, {"sku": "B-2"}]})).pass);
    }

    #[test]
    fn test_json_path_parses_string_documents() {
        let m = json_path("$.id", eq(7)).unwrap();
        assert!(check(&m, json!("{\"id\": 7}")).pass);
    }

    #[test]
    fn test_invalid_path() {
        assert!(json_path("$[", eq(1)).is_err());
    }

    #[test]
    fn test_eq_json() {
        let m = eq_json(json!({"a": [1, 2]}));
        assert!(check(&m, json!({"a": [1, 2]})).pass);
        assert!(check(&m, json!("{\"a\":[1,2]}")).pass);
        assert!(!check(&m, json!({"a": [2, 1]})).pass);
    }
}
