//! Retry with backoff for transient collaborator failures.
//!
//! Retries happen inside a handler around a single collaborator call; the
//! scheduler only ever sees the final outcome.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::clients::{ClientError, ClientResult};

/// Strategy for spacing out retry attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Exponential backoff with configurable parameters
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    },
    /// Linear backoff with fixed delay
    Linear { delay_ms: u64 },
    /// No delay between retries
    Immediate,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_ms: 200,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

fn default_max_attempts() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per collaborator call, the first one included.
    /// 1 disables retrying.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub strategy: RetryStrategy,
    /// Add up to ±10% random jitter to every delay
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: RetryStrategy::default(),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(max_attempts: u32, strategy: RetryStrategy) -> Self {
        Self {
            max_attempts,
            strategy,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay before retry number `attempt` (1 for the first retry)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis = match &self.strategy {
            RetryStrategy::Exponential {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
            } => {
                let exponent = attempt.saturating_sub(1) as i32;
                let delay = (*initial_delay_ms as f64 * multiplier.powi(exponent)).round();
                (delay as u64).min(*max_delay_ms)
            }
            RetryStrategy::Linear { delay_ms } => delay_ms.saturating_mul(attempt as u64),
            RetryStrategy::Immediate => 0,
        };

        if self.jitter && millis > 0 {
            let jitter = (fastrand::u32(..) as f64 / u32::MAX as f64) * 0.2 - 0.1;
            Duration::from_millis((millis as f64 * (1.0 + jitter)).max(0.0) as u64)
        } else {
            Duration::from_millis(millis)
        }
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient collaborator failure, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(give_up(err, attempt)),
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be greater than 0".to_string());
        }
        if let RetryStrategy::Exponential {
            initial_delay_ms,
            max_delay_ms,
            multiplier,
        } = &self.strategy
        {
            if *multiplier < 1.0 {
                return Err("retry.strategy.multiplier must be >= 1.0".to_string());
            }
            if initial_delay_ms > max_delay_ms {
                return Err("retry.strategy.initial_delay_ms cannot exceed max_delay_ms".to_string());
            }
        }
        Ok(())
    }
}

fn give_up(mut err: ClientError, attempts: u32) -> ClientError {
    if attempts > 1 {
        err.message = format!("{} (after {} attempts)", err.message, attempts);
    }
    err
}
