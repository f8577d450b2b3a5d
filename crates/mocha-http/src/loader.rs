//! Mock definitions loaded from YAML or JSON files.
//!
//! A file holds a single mock, a list of mocks, or a `mocks:` list. Every
//! mock registered from a file is tagged with the file path as its source,
//! so reloading a file replaces exactly the mocks it produced.
//!
//! ```yaml
//! mocks:
//!   - name: get-user
//!     request:
//!       method: GET
//!       path: /users/1
//!       headers:
//!         accept: application/json
//!     response:
//!       status: 200
//!       json: { id: 1, name: Ada }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::matcher::{contains, eq, eq_json, json_path, matches_regex};
use crate::mock::{weight, MockBuilder, Target};
use crate::reply::{ProxiedReply, RandomReply, SequentialReply, StaticReply};
use crate::request::RequestValues;
use crate::server::MockServer;

/// Source of mocks registered into a server.
pub trait Loader: Send + Sync {
    /// Register mocks. Returns how many were added.
    fn load(&self, server: &MockServer) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum MockFile {
    Wrapped { mocks: Vec<MockDefinition> },
    List(Vec<MockDefinition>),
    Single(Box<MockDefinition>),
}

impl MockFile {
    fn into_definitions(self) -> Vec<MockDefinition> {
        match self {
            MockFile::Wrapped { mocks } | MockFile::List(mocks) => mocks,
            MockFile::Single(mock) => vec![*mock],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MockDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub request: RequestDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<ScenarioDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    // Exactly one of the following
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<SequenceDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random: Option<Vec<ResponseDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyDefinition>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RequestDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_regex: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    /// Substring of the raw body text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_contains: Option<String>,
    /// JSONPath expression to expected value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub body_json: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_state: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    /// Relative paths resolve against the definition file's directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_file: Option<PathBuf>,
    /// Render `body` as a template
    #[serde(default)]
    pub template: bool,
    #[serde(default)]
    pub gzip: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceDefinition {
    pub responses: Vec<ResponseDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_ended: Option<ResponseDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyDefinition {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_prefix: Option<String>,
    /// Extra headers sent upstream
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

fn default_true() -> bool {
    true
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    fn to_reply(&self, base_dir: &Path) -> StaticReply {
        let mut reply = StaticReply::new(self.status);
        for (name, value) in &self.headers {
            reply = reply.header(name, value);
        }
        if let Some(json) = &self.json {
            reply = reply.json(json);
        }
        if let Some(body) = &self.body {
            reply = if self.template {
                reply.body_template(body.clone())
            } else {
                reply.text(body.clone())
            };
        }
        if let Some(file) = &self.body_file {
            reply = reply.body_file(base_dir.join(file));
        }
        if self.gzip {
            reply = reply.gzip();
        }
        reply
    }
}

impl MockDefinition {
    /// Convert into a builder. Relative file references resolve against
    /// `base_dir`.
    pub fn to_builder(&self, base_dir: &Path) -> anyhow::Result<MockBuilder> {
        let mut builder = MockBuilder::new()
            .priority(self.priority)
            .enabled(self.enabled);
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }

        builder = self.request.apply(builder)?;

        if let Some(times) = self.times {
            builder = builder.times(times);
        }
        if let Some(scenario) = &self.scenario {
            builder = builder.scenario_is(scenario.name.clone());
            if let Some(state) = &scenario.required_state {
                builder = builder.scenario_state_is(state.clone());
            }
            if let Some(state) = &scenario.new_state {
                builder = builder.scenario_state_will_be(state.clone());
            }
        }
        if let Some(delay) = self.delay_ms {
            builder = builder.delay(Duration::from_millis(delay));
        }

        let kinds = [
            self.response.is_some(),
            self.sequence.is_some(),
            self.random.is_some(),
            self.proxy.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if kinds != 1 {
            bail!(
                "mock {} must define exactly one of response, sequence, random or proxy",
                self.name.as_deref().unwrap_or("<unnamed>")
            );
        }

        if let Some(response) = &self.response {
            builder = builder.reply(response.to_reply(base_dir));
        } else if let Some(sequence) = &self.sequence {
            let mut reply = SequentialReply::new();
            for response in &sequence.responses {
                reply = reply.add(response.to_reply(base_dir));
            }
            if let Some(after) = &sequence.after_ended {
                reply = reply.after_ended(after.to_reply(base_dir));
            }
            builder = builder.reply(reply);
        } else if let Some(responses) = &self.random {
            let mut reply = RandomReply::new();
            for response in responses {
                reply = reply.add(response.to_reply(base_dir));
            }
            builder = builder.reply(reply);
        } else if let Some(proxy) = &self.proxy {
            let mut reply = ProxiedReply::to(proxy.target.clone());
            if let Some(timeout) = proxy.timeout_ms {
                reply = reply.timeout(Duration::from_millis(timeout));
            }
            if let Some(prefix) = &proxy.trim_prefix {
                reply = reply.trim_prefix(prefix.clone());
            }
            for (name, value) in &proxy.headers {
                reply = reply.proxy_header(name, value);
            }
            if proxy.skip_tls_verify {
                reply = reply.skip_tls_verify();
            }
            builder = builder.reply(reply);
        }

        Ok(builder)
    }
}

impl RequestDefinition {
    fn apply(&self, mut builder: MockBuilder) -> anyhow::Result<MockBuilder> {
        if let Some(method) = &self.method {
            builder = builder.method(method);
        }
        if let Some(path) = &self.path {
            builder = builder.path(path);
        }
        if let Some(pattern) = &self.path_regex {
            let regex = Regex::new(pattern)
                .with_context(|| format!("invalid path_regex '{pattern}'"))?;
            builder = builder.path_matches(matches_regex(regex));
        }
        for (name, value) in &self.headers {
            builder = builder.header(name, eq(value.as_str()));
        }
        for (name, value) in &self.query {
            builder = builder.query(name, eq(value.as_str()));
        }
        if let Some(needle) = &self.body_contains {
            builder = builder.expect(
                Target::Body,
                None,
                Arc::new(|r: &RequestValues| Value::String(r.body_text())),
                contains(needle.clone()),
                weight::HIGH,
            );
        }
        for (path, expected) in &self.body_json {
            let matcher = json_path(path, eq_json(expected.clone()))
                .with_context(|| format!("invalid body_json path '{path}'"))?;
            builder = builder.body(matcher);
        }
        Ok(builder)
    }
}

/// Parse every mock definition in `path`.
pub fn read_definitions(path: &Path) -> anyhow::Result<Vec<MockDefinition>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file: MockFile = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&contents)
            .with_context(|| format!("invalid mock file {}", path.display()))?
    } else {
        serde_yaml::from_str(&contents)
            .with_context(|| format!("invalid mock file {}", path.display()))?
    };
    Ok(file.into_definitions())
}

fn is_mock_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml" || ext == "json")
}

/// Loads mock definition files, tagging each mock with its file path.
#[derive(Debug, Clone, Default)]
pub struct FileLoader {
    paths: Vec<PathBuf>,
}

impl FileLoader {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }

    /// Every `*.yaml`, `*.yml` and `*.json` file directly inside `dir`, in
    /// name order.
    pub fn from_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("failed to read mocks dir {}", dir.display()))?
            .flatten()
        {
            let path = entry.path();
            if is_mock_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(Self { paths })
    }

    /// Files named by `mocks_dir` and `mock_files`.
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let mut loader = match &config.mocks_dir {
            Some(dir) => Self::from_dir(dir)?,
            None => Self::default(),
        };
        loader.paths.extend(config.mock_files.iter().cloned());
        Ok(loader)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn load_file(&self, server: &MockServer, path: &Path) -> anyhow::Result<usize> {
        let source = path.display().to_string();
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let builders = read_definitions(path)?
            .iter()
            .map(|d| d.to_builder(base_dir).map(|b| b.source(source.clone())))
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| format!("invalid mock in {source}"))?;
        let added = server
            .add_all(builders)
            .with_context(|| format!("failed to register mocks from {source}"))?;
        debug!(file = %source, count = added.len(), "Loaded mock file");
        Ok(added.len())
    }

    /// Drop every mock previously loaded from these files, then load them
    /// again.
    pub fn reload(&self, server: &MockServer) -> anyhow::Result<usize> {
        for path in &self.paths {
            let removed = server.delete_by_source(&path.display().to_string());
            debug!(file = %path.display(), removed, "Removed mocks before reload");
        }
        self.load(server)
    }
}

impl Loader for FileLoader {
    fn load(&self, server: &MockServer) -> anyhow::Result<usize> {
        let mut total = 0;
        for path in &self.paths {
            total += self.load_file(server, path)?;
        }
        info!(files = self.paths.len(), mocks = total, "Loaded mock files");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_shapes() {
        let single: MockFile = serde_yaml::from_str(
            "request: { path: /a }\nresponse: { status: 204 }\n",
        )
        .unwrap();
        assert_eq!(single.into_definitions().len(), 1);

        let list: MockFile = serde_yaml::from_str(
            "- request: { path: /a }\n  response: {}\n- request: { path: /b }\n  response: {}\n",
        )
        .unwrap();
        assert_eq!(list.into_definitions().len(), 2);

        let wrapped: MockFile =
            serde_json::from_str(r#"{"mocks": [{"request": {"path": "/a"}, "response": {}}]}"#)
                .unwrap();
        let definitions = wrapped.into_definitions();
        assert_eq!(definitions[0].response.as_ref().unwrap().status, 200);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result: Result<MockDefinition, _> =
            serde_yaml::from_str("request: { path: /a, methd: GET }\nresponse: {}\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_requires_exactly_one_reply() {
        let definition: MockDefinition = serde_yaml::from_str(
            "name: both\nrequest: { path: /a }\nresponse: {}\nrandom: [{}]\n",
        )
        .unwrap();
        let err = definition.to_builder(Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("exactly one"));

        let definition: MockDefinition =
            serde_yaml::from_str("request: { path: /a }\n").unwrap();
        assert!(definition.to_builder(Path::new(".")).is_err());
    }

    #[test]
    fn test_invalid_regex_is_reported() {
        let definition: MockDefinition =
            serde_yaml::from_str("request: { path_regex: '[' }\nresponse: {}\n").unwrap();
        let err = definition.to_builder(Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("path_regex"));
    }

    #[test]
    fn test_from_dir_picks_mock_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), "request: {path: /b}\nresponse: {}\n").unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loader = FileLoader::from_dir(dir.path()).unwrap();
        let names: Vec<_> = loader
            .paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "b.yaml"]);
    }

    #[tokio::test]
    async fn test_load_and_reload_tag_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mocks.yaml");
        std::fs::write(
            &path,
            r#"
mocks:
  - name: one
    request: { method: GET, path: /one }
    response: { status: 200, body: one }
  - name: two
    request: { method: GET, path: /two }
    sequence:
      responses: [{ body: first }, { body: second }]
"#,
        )
        .unwrap();

        let server = MockServer::new(ServerConfig::default()).unwrap();
        server
            .add(MockBuilder::get("/manual").reply(StaticReply::ok()))
            .unwrap();

        let loader = FileLoader::new([path.clone()]);
        assert_eq!(server.load(&loader).unwrap(), 2);
        assert_eq!(server.mocks().len(), 3);
        let source = path.display().to_string();
        assert_eq!(
            server
                .mocks()
                .iter()
                .filter(|m| m.source() == Some(source.as_str()))
                .count(),
            2
        );

        assert_eq!(loader.reload(&server).unwrap(), 2);
        assert_eq!(server.mocks().len(), 3);

        assert_eq!(server.delete_external(), 2);
        assert_eq!(server.mocks().len(), 1);
    }
}
