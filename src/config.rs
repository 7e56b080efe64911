//! Configuration for query execution

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for query execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Upper bound on a single execution, `None` to wait indefinitely
    pub timeout: Option<Duration>,
    /// Maximum number of series each source fetches, 0 for no limit
    pub fetch_limit: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            fetch_limit: 0,
        }
    }
}

impl ExecutionConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn with_fetch_limit(mut self, fetch_limit: usize) -> Self {
        self.fetch_limit = fetch_limit;
        self
    }

    /// Parses a JSON config, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
