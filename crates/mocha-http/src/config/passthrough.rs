//! Passthrough proxy configuration for requests no mock matched.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PassthroughConfig {
    /// Base URL unmatched requests are forwarded to
    pub target: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub skip_tls_verify: bool,
    /// Tunnel CONNECT requests to their authority
    #[serde(default = "default_true")]
    pub tunnel_connect: bool,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

impl PassthroughConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            timeout_ms: default_timeout_ms(),
            skip_tls_verify: false,
            tunnel_connect: true,
        }
    }
}
