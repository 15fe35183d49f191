//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Workflow engine (runs, stages, fraud scoring)
//! - Orchestrator (attempts, retries, timeouts, sweeps)
//! - External services (LLM)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Workflow Engine Metrics
// =============================================================================

/// Pipeline runs started total.
pub static RUNS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("tally_runs_started_total", "Total pipeline runs started").unwrap()
});

/// Pipeline runs reaching a terminal status, by status.
pub static RUNS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tally_runs_completed_total",
            "Total pipeline runs reaching a terminal status",
        ),
        &["status"], // "completed", "flagged_fraud", "needs_review", "failed"
    )
    .unwrap()
});

/// Stage executions total by stage.
pub static STAGE_EXECUTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tally_stage_executions_total", "Total stage executions"),
        &["stage"],
    )
    .unwrap()
});

/// Run duration in seconds.
pub static RUN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("tally_run_duration_seconds", "Duration of pipeline runs")
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["status"],
    )
    .unwrap()
});

/// Distribution of fraud scores produced by the scoring stage.
pub static FRAUD_SCORES: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("tally_fraud_score", "Distribution of fraud scores").buckets(vec![
            0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0,
        ]),
        &[],
    )
    .unwrap()
});

/// Validation errors found per run.
pub static VALIDATION_ERRORS_FOUND: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "tally_validation_errors",
            "Number of validation errors found per run",
        )
        .buckets(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 10.0]),
        &[],
    )
    .unwrap()
});

// =============================================================================
// Orchestrator Metrics
// =============================================================================

/// Task attempts total by result.
pub static TASK_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tally_task_attempts_total", "Total task attempts"),
        &["result"], // "success", "retried", "failed"
    )
    .unwrap()
});

/// Retry attempts total.
pub static RETRY_ATTEMPTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("tally_retry_attempts_total", "Total task retry attempts").unwrap()
});

/// Task timeouts total by limit kind.
pub static TASK_TIMEOUTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tally_task_timeouts_total", "Total task timeouts"),
        &["limit"], // "soft", "hard"
    )
    .unwrap()
});

/// Receipts queued by the periodic rescan sweep.
pub static SWEEP_QUEUED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "tally_sweep_queued_total",
        "Total receipts re-queued by the rescan sweep",
    )
    .unwrap()
});

// =============================================================================
// External Service Metrics
// =============================================================================

/// LLM requests total by provider and status.
pub static LLM_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tally_llm_requests_total", "Total LLM requests"),
        &["provider", "status"], // status: "success", "error"
    )
    .unwrap()
});

/// LLM tokens used.
pub static LLM_TOKENS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tally_llm_tokens_total", "Total LLM tokens used"),
        &["provider", "direction"], // direction: "input", "output"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Engine
        Box::new(RUNS_STARTED.clone()),
        Box::new(RUNS_COMPLETED.clone()),
        Box::new(STAGE_EXECUTIONS.clone()),
        Box::new(RUN_DURATION.clone()),
        Box::new(FRAUD_SCORES.clone()),
        Box::new(VALIDATION_ERRORS_FOUND.clone()),
        // Orchestrator
        Box::new(TASK_ATTEMPTS.clone()),
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(TASK_TIMEOUTS.clone()),
        Box::new(SWEEP_QUEUED.clone()),
        // External services
        Box::new(LLM_REQUESTS.clone()),
        Box::new(LLM_TOKENS.clone()),
    ]
}
