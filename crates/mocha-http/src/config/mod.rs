//! Configuration types for the mock server.

mod listen;
mod passthrough;
mod recording;

use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use listen::ListenConfig;
pub use passthrough::PassthroughConfig;
pub use recording::RecordConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub listen: ListenConfig,

    /// Status returned when no mock matches and no passthrough is set
    #[serde(default = "default_no_match_status")]
    pub no_match_status: u16,

    /// Upper bound applied to every mock delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<PassthroughConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordConfig>,

    /// Directory scanned for `*.yaml`, `*.yml` and `*.json` mock files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mocks_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mock_files: Vec<PathBuf>,

    /// Extra data exposed to response templates as `ext`
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub template_data: Value,

    /// Serve Prometheus metrics on `/__mocha/metrics`
    #[serde(default)]
    pub metrics: bool,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_no_match_status() -> u16 {
    StatusCode::IM_A_TEAPOT.as_u16()
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_event_capacity() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            no_match_status: default_no_match_status(),
            max_delay_ms: default_max_delay_ms(),
            proxy: None,
            record: None,
            mocks_dir: None,
            mock_files: Vec::new(),
            template_data: Value::Null,
            metrics: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let status = StatusCode::from_u16(self.no_match_status).map_err(|_| {
            anyhow::anyhow!("no_match_status {} is not a valid status", self.no_match_status)
        })?;
        if status.is_success() {
            anyhow::bail!(
                "no_match_status must not be a 2xx status, got {}",
                self.no_match_status
            );
        }

        if let Some(proxy) = &self.proxy {
            let url = reqwest::Url::parse(&proxy.target).map_err(|e| {
                anyhow::anyhow!("invalid proxy.target '{}': {}", proxy.target, e)
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                anyhow::bail!(
                    "unsupported proxy.target scheme '{}'. Currently supported: http, https",
                    url.scheme()
                );
            }
            if proxy.timeout_ms == 0 {
                anyhow::bail!("proxy.timeout_ms must be greater than 0");
            }
        }

        if let Some(record) = &self.record {
            if record.queue_size == 0 {
                anyhow::bail!("record.queue_size must be greater than 0");
            }
        }

        if let Some(dir) = &self.mocks_dir {
            if !dir.is_dir() {
                anyhow::bail!("mocks_dir {} is not a directory", dir.display());
            }
        }

        Ok(())
    }

    pub fn no_match_status(&self) -> StatusCode {
        StatusCode::from_u16(self.no_match_status).unwrap_or(StatusCode::IM_A_TEAPOT)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: ServerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.no_match_status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(config.listen.host, "127.0.0.1");
        assert_eq!(config.listen.port, 0);
        assert_eq!(config.max_delay(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mocha.yaml");
        std::fs::write(
            &path,
            r#"
listen:
  host: 0.0.0.0
  port: 8089
no_match_status: 404
proxy:
  target: http://localhost:9000
record:
  queue_size: 16
  path: traffic.jsonl
template_data:
  region: eu
metrics: true
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.listen.address(), "0.0.0.0:8089");
        assert_eq!(config.no_match_status(), StatusCode::NOT_FOUND);
        let proxy = config.proxy.unwrap();
        assert_eq!(proxy.timeout_ms, 10_000);
        assert!(proxy.tunnel_connect);
        assert_eq!(config.record.unwrap().queue_size, 16);
        assert_eq!(config.template_data["region"], "eu");
        assert!(config.metrics);
    }

    #[test]
    fn test_rejects_success_no_match_status() {
        let config = ServerConfig {
            no_match_status: 200,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_proxy_target() {
        let config = ServerConfig {
            proxy: Some(PassthroughConfig::new("ftp://example.com")),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scheme"));
    }

    #[test]
    fn test_rejects_empty_queue() {
        let config = ServerConfig {
            record: Some(RecordConfig {
                queue_size: 0,
                path: None,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
