//! Types for the receipt orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{EngineError, ProcessingStatus};
use crate::store::StoreError;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The workflow engine failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// The attempt exceeded the hard time limit.
    #[error("hard time limit exceeded ({secs}s)")]
    HardTimeout { secs: u64 },

    /// All retry attempts were exhausted.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The background task driving a scheduled run was cancelled or
    /// panicked before producing a report.
    #[error("scheduled run task failed: {0}")]
    TaskFailed(String),

    /// The orchestrator is shutting down and rejects new runs.
    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

/// Final disposition of a run from the caller's perspective.
///
/// A run that completes the workflow counts as `Success` even when the
/// workflow itself landed on a failure status; `Failed` means the run
/// could not be carried out at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failed,
}

/// Result payload for a single processed receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub receipt_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_status: Option<ProcessingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraud_score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn success(
        receipt_id: impl Into<String>,
        processing_status: ProcessingStatus,
        fraud_score: i64,
        merchant_name: Option<String>,
        total_amount: Option<f64>,
    ) -> Self {
        Self {
            outcome: RunOutcome::Success,
            receipt_id: receipt_id.into(),
            processing_status: Some(processing_status),
            fraud_score: Some(fraud_score),
            merchant_name,
            total_amount,
            error: None,
        }
    }

    pub fn failed(receipt_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            outcome: RunOutcome::Failed,
            receipt_id: receipt_id.into(),
            processing_status: None,
            fraud_score: None,
            merchant_name: None,
            total_amount: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of one entry in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub receipt_id: String,
    pub outcome: RunOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of a sequential batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchItem>,
}

/// Outcome of a rescan sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOutcome {
    /// Number of receipts queued for reprocessing.
    pub queued: usize,
}

/// Progress milestone emitted while a run executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub receipt_id: String,
    pub percent: u8,
    pub step: String,
}

/// Snapshot of the orchestrator state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub active_runs: usize,
    pub max_concurrent_runs: usize,
}
