//! Configuration for job execution.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::suspend::DEFAULT_INPUT_TIMEOUT;

/// Limits and behaviour switches for one job's execution loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobLoopConfig {
    /// Steps before the job is failed for exhausting its budget.
    /// Default: 100
    pub max_steps: u64,

    /// How long one input request waits for a human, in milliseconds.
    /// Default: 300000 (5 minutes)
    pub input_timeout_ms: u64,

    /// Extra attempts after a driver fault before the job fails.
    /// Default: 1
    pub driver_retry_limit: u32,

    /// Oracle failures in a row before the job fails.
    /// Default: 3
    pub max_consecutive_oracle_failures: u32,

    /// Pause between steps in milliseconds.
    /// Default: 0
    pub step_delay_ms: u64,

    /// Skip proposed actions whose signature already failed.
    /// Default: true
    pub skip_repeated_failures: bool,
}

impl Default for JobLoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            input_timeout_ms: DEFAULT_INPUT_TIMEOUT.as_millis() as u64,
            driver_retry_limit: 1,
            max_consecutive_oracle_failures: 3,
            step_delay_ms: 0,
            skip_repeated_failures: true,
        }
    }
}

impl JobLoopConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Small budgets for tests.
    pub fn minimal() -> Self {
        Self {
            max_steps: 20,
            input_timeout_ms: 2_000,
            driver_retry_limit: 1,
            max_consecutive_oracle_failures: 2,
            step_delay_ms: 0,
            skip_repeated_failures: true,
        }
    }

    pub fn input_timeout(&self) -> Duration {
        Duration::from_millis(self.input_timeout_ms)
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_input_timeout(mut self, timeout: Duration) -> Self {
        self.input_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_driver_retry_limit(mut self, limit: u32) -> Self {
        self.driver_retry_limit = limit;
        self
    }

    pub fn with_step_delay_ms(mut self, delay: u64) -> Self {
        self.step_delay_ms = delay;
        self
    }

    pub fn with_skip_repeated_failures(mut self, skip: bool) -> Self {
        self.skip_repeated_failures = skip;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let config = JobLoopConfig::default();
        assert_eq!(config.max_steps, 100);
        assert_eq!(config.input_timeout(), Duration::from_secs(300));
        assert_eq!(config.driver_retry_limit, 1);
        assert!(config.skip_repeated_failures);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: JobLoopConfig = serde_json::from_str(r#"{"max_steps": 5}"#).unwrap();
        assert_eq!(config.max_steps, 5);
        assert_eq!(config.max_consecutive_oracle_failures, 3);
    }
}
