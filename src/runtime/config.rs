use serde::{Deserialize, Serialize};

use crate::evaluator::{DEFAULT_CACHE_SIZE, DEFAULT_MAX_STEPS};

/// Retry behavior for workflow steps with `error_handling: retry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Backoff before the second attempt, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubled backoff, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 5,
            max_backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff after `attempt` failed attempts (1-based).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let base = self.initial_backoff_ms.max(1);
        let max = self.max_backoff_ms.max(base);
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        base.saturating_mul(factor).min(max)
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Identity used for `current_user()` when a mutation has no caller
    pub default_user: Option<String>,

    /// Evaluation step budget per expression
    pub max_expression_steps: usize,

    /// Number of parsed expressions kept in the LRU cache
    pub expression_cache_size: usize,

    /// How deep automation-caused mutations may nest
    pub max_automation_depth: usize,

    /// Steps a single workflow run may execute, counting jumps
    pub max_workflow_steps: usize,

    /// Retry defaults for steps that do not set their own
    pub retry: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_user: None,
            max_expression_steps: DEFAULT_MAX_STEPS,
            expression_cache_size: DEFAULT_CACHE_SIZE,
            max_automation_depth: 8,
            max_workflow_steps: 1_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default caller identity
    pub fn default_user(mut self, user: impl Into<String>) -> Self {
        self.default_user = Some(user.into());
        self
    }

    /// Set the expression step budget
    pub fn max_expression_steps(mut self, steps: usize) -> Self {
        self.max_expression_steps = steps;
        self
    }

    /// Set the expression cache size
    pub fn expression_cache_size(mut self, size: usize) -> Self {
        self.expression_cache_size = size;
        self
    }

    /// Set the automation nesting limit
    pub fn max_automation_depth(mut self, depth: usize) -> Self {
        self.max_automation_depth = depth;
        self
    }

    /// Set the workflow step budget
    pub fn max_workflow_steps(mut self, steps: usize) -> Self {
        self.max_workflow_steps = steps;
        self
    }

    /// Set the default retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
