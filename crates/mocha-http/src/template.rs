//! Response templating.
//!
//! Replies that carry templates parse them once when the mock is registered
//! and render them per request against a fixed data model:
//!
//! - `${request.method}`, `${request.url}`, `${request.path}`
//! - `${request.segments.<n>}` - path segment by index
//! - `${request.headers.<name>}` - header value (case-insensitive)
//! - `${request.query.<name>}`, `${request.cookies.<name>}`
//! - `${request.body}` or `${request.body.<field>...}` for parsed bodies
//! - `${app.url}` - base URL of the mock server
//! - `${ext.<field>...}` - extra data supplied by the caller
//!
//! The engine is pluggable through [`TemplateEngine`]; [`PlaceholderEngine`]
//! is the built-in implementation.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::request::RequestValues;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TemplateError(pub String);

/// Parses template sources into renderers.
pub trait TemplateEngine: Send + Sync {
    fn parse(&self, source: &str) -> Result<Box<dyn TemplateRenderer>, TemplateError>;
}

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, out: &mut String, data: &Value) -> Result<(), TemplateError>;
}

static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();
static VARIABLE_REGEX: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX.get_or_init(|| Regex::new(r"\$\{([^}]*)\}").unwrap())
}

fn variable_regex() -> &'static Regex {
    VARIABLE_REGEX
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_-]+)*$").unwrap())
}

/// `${dotted.path}` substitution. Missing values render as an empty string.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderEngine;

#[derive(Debug)]
enum Part {
    Text(String),
    Variable(Vec<String>),
}

#[derive(Debug)]
struct PlaceholderTemplate {
    parts: Vec<Part>,
}

impl TemplateEngine for PlaceholderEngine {
    fn parse(&self, source: &str) -> Result<Box<dyn TemplateRenderer>, TemplateError> {
        let mut parts = Vec::new();
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(source) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let text = &source[last..whole.start()];
            check_unterminated(text)?;
            if !text.is_empty() {
                parts.push(Part::Text(text.to_string()));
            }

            let variable = inner.as_str().trim();
            if !variable_regex().is_match(variable) {
                return Err(TemplateError(format!(
                    "invalid template variable '{}' at offset {}",
                    variable,
                    whole.start()
                )));
            }
            parts.push(Part::Variable(
                variable.split('.').map(str::to_string).collect(),
            ));
            last = whole.end();
        }

        let tail = &source[last..];
        check_unterminated(tail)?;
        if !tail.is_empty() {
            parts.push(Part::Text(tail.to_string()));
        }

        Ok(Box::new(PlaceholderTemplate { parts }))
    }
}

fn check_unterminated(text: &str) -> Result<(), TemplateError> {
    if text.contains("${") {
        return Err(TemplateError(
            "unterminated template placeholder, missing '}'".to_string(),
        ));
    }
    Ok(())
}

impl TemplateRenderer for PlaceholderTemplate {
    fn render(&self, out: &mut String, data: &Value) -> Result<(), TemplateError> {
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Variable(path) => {
                    if let Some(value) = lookup(data, path) {
                        match value {
                            Value::Null => {}
                            Value::String(s) => out.push_str(s),
                            other => out.push_str(&other.to_string()),
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn lookup<'a>(data: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(data, |current, segment| match current {
        Value::Object(map) => map
            .get(segment)
            .or_else(|| map.get(&segment.to_ascii_lowercase())),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a parsed template into a new string.
pub fn render_to_string(
    renderer: &dyn TemplateRenderer,
    data: &Value,
) -> Result<String, TemplateError> {
    let mut out = String::new();
    renderer.render(&mut out, data)?;
    Ok(out)
}

/// Build the data model templates render against.
pub fn template_data(request: &RequestValues, ext: &Value) -> Value {
    let headers: Map<String, Value> = request
        .headers
        .keys()
        .filter_map(|name| {
            request
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| (name.as_str().to_string(), Value::String(v.to_string())))
        })
        .collect();

    let query: Map<String, Value> = request
        .query
        .iter()
        .filter_map(|(k, v)| v.first().map(|first| (k.clone(), Value::String(first.clone()))))
        .collect();

    let cookies: Map<String, Value> = request
        .cookies
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let body = match &request.body {
        Some(value) => value.clone(),
        None if request.raw_body.is_empty() => Value::Null,
        None => Value::String(request.body_text()),
    };

    json!({
        "request": {
            "method": request.method.as_str(),
            "url": request.url,
            "path": request.path,
            "segments": request.segments,
            "headers": headers,
            "query": query,
            "cookies": cookies,
            "body": body,
        },
        "app": {
            "url": request.server_url,
        },
        "ext": ext,
    })
}
