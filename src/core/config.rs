use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::errors::{ExecutorError, Result};
use crate::handlers::retry::RetryPolicy;

fn default_concurrency_limit() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_polls() -> u32 {
    120
}

/// How long middleware operations wait for an instance to reach the phase
/// they need
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseWait {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

impl Default for PhaseWait {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
        }
    }
}

impl PhaseWait {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configuration for plan execution behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of handler calls in flight at once
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Retry policy applied by the built-in handlers
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Stop dispatching once a run has taken this long (None = no deadline)
    #[serde(default)]
    pub plan_deadline_ms: Option<u64>,
    #[serde(default)]
    pub phase_wait: PhaseWait,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            retry: RetryPolicy::default(),
            plan_deadline_ms: None,
            phase_wait: PhaseWait::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ExecutorError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Deadline kept at millisecond precision
    pub fn with_plan_deadline(mut self, deadline: Duration) -> Self {
        self.plan_deadline_ms = Some(u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_phase_wait(mut self, phase_wait: PhaseWait) -> Self {
        self.phase_wait = phase_wait;
        self
    }

    pub fn plan_deadline(&self) -> Option<Duration> {
        self.plan_deadline_ms.map(Duration::from_millis)
    }

    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(ExecutorError::InvalidConfiguration(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }

        if let Some(deadline) = self.plan_deadline_ms {
            if deadline == 0 {
                return Err(ExecutorError::InvalidConfiguration(
                    "plan_deadline_ms must be greater than 0".to_string(),
                ));
            }
        }

        if self.phase_wait.max_polls == 0 {
            return Err(ExecutorError::InvalidConfiguration(
                "phase_wait.max_polls must be greater than 0".to_string(),
            ));
        }

        self.retry
            .validate()
            .map_err(ExecutorError::InvalidConfiguration)
    }
}
