//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the receipt orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Whether the orchestrator is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum number of receipt runs processed concurrently.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Retry and timeout behavior for individual runs.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Periodic rescan sweep over recent low-score receipts.
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_concurrent_runs: default_max_concurrent_runs(),
            retry: RetryConfig::default(),
            sweep: SweepConfig::default(),
        }
    }
}

/// Retry and timeout settings for a single receipt run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt. With the default of 3 a run
    /// executes at most 4 times.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Upper bound on the backoff delay.
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Soft time limit checked between workflow stages.
    #[serde(default = "default_soft_timeout_secs")]
    pub soft_timeout_secs: u64,

    /// Hard time limit that aborts the attempt outright.
    #[serde(default = "default_hard_timeout_secs")]
    pub hard_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            soft_timeout_secs: default_soft_timeout_secs(),
            hard_timeout_secs: default_hard_timeout_secs(),
        }
    }
}

impl RetryConfig {
    /// Delay before the given retry, 1-based. Doubles per retry from the
    /// base and is capped at `backoff_cap_secs`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(32);
        let secs = self
            .backoff_base_secs
            .saturating_mul(1u64 << exp)
            .min(self.backoff_cap_secs);
        Duration::from_secs(secs)
    }

    pub fn soft_timeout(&self) -> Duration {
        Duration::from_secs(self.soft_timeout_secs)
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_secs(self.hard_timeout_secs)
    }
}

/// Settings for the periodic rescan sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Whether the background sweep loop runs at all.
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between sweep passes.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,

    /// Only receipts created within this many days are rescanned.
    #[serde(default = "default_sweep_window_days")]
    pub window_days: i64,

    /// Only receipts strictly below this fraud score are rescanned.
    #[serde(default = "default_sweep_max_score")]
    pub max_score: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_sweep_interval_secs(),
            window_days: default_sweep_window_days(),
            max_score: default_sweep_max_score(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_concurrent_runs() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    1
}

fn default_backoff_cap_secs() -> u64 {
    600
}

fn default_soft_timeout_secs() -> u64 {
    300
}

fn default_hard_timeout_secs() -> u64 {
    360
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_sweep_window_days() -> i64 {
    7
}

fn default_sweep_max_score() -> i64 {
    50
}
