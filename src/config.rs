//! Engine configuration

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// When cancellations of previously armed tokens are issued
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationMode {
    /// In action order, before commit; a failed cancel aborts the transition.
    ///
    /// A transition that fails after such a cancel leaves the stored
    /// instance pointing at timers that no longer exist.
    Immediate,
    /// After the store commit; failures are only logged
    #[default]
    AfterCommit,
}

/// Bounded retry with exponential backoff, for conflicts and redelivery
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds)
    pub initial_delay_millis: u64,
    /// Maximum delay cap (milliseconds)
    pub max_delay_millis: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_millis: 10,
            max_delay_millis: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, up to `max_attempts` attempts in total
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_millis: 0,
            max_delay_millis: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculate delay before retry number `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let delay = self.initial_delay_millis as f64
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = delay.min(self.max_delay_millis as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Engine settings
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retry budget for concurrency conflicts
    pub conflict_retry: RetryPolicy,
    /// Redelivery of retriable failures by [`SagaEngine::run`](crate::SagaEngine::run)
    pub redelivery: RetryPolicy,
    /// Cancellation ordering for superseded timers
    pub cancellation: CancellationMode,
}

impl EngineConfig {
    /// Load from an optional file, overridden by `SAGA__*` environment variables.
    ///
    /// `SAGA__CONFLICT_RETRY__MAX_ATTEMPTS=3` sets `conflict_retry.max_attempts`.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix("SAGA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
