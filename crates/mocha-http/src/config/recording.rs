//! Traffic recording configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::recording::DEFAULT_QUEUE_SIZE;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordConfig {
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// JSON lines file. Without a path exchanges are kept in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            path: None,
        }
    }
}
