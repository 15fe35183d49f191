use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Run lifecycle
    /// Processing started for a receipt.
    RunStarted {
        /// Receipt being processed
        receipt_id: String,
        /// Owning expense report
        report_id: String,
        /// Attempt number (1-based, counts retries)
        attempt: u32,
    },
    /// Processing reached a terminal status and results were persisted.
    RunCompleted {
        /// Receipt that was processed
        receipt_id: String,
        /// Terminal processing status (e.g. "completed", "flagged_fraud")
        status: String,
        /// Fraud score assigned to the receipt (0-100)
        fraud_score: i64,
        /// Total wall-clock duration across attempts in milliseconds
        duration_ms: u64,
    },
    /// An attempt failed and another one was scheduled.
    RunRetryScheduled {
        /// Receipt being processed
        receipt_id: String,
        /// Attempt that failed (1-based)
        attempt: u32,
        /// Backoff delay before the next attempt in milliseconds
        delay_ms: u64,
        /// Error that triggered the retry
        error: String,
    },
    /// All attempts were exhausted without a terminal status.
    RunFailed {
        /// Receipt being processed
        receipt_id: String,
        /// Number of attempts made
        attempts: u32,
        /// Last error observed
        error: String,
    },

    // Report events
    /// An expense report was flagged because one of its receipts needs attention.
    ReportFlagged {
        /// Report that was flagged
        report_id: String,
        /// Receipt whose run caused the flag
        receipt_id: String,
        /// Processing status that triggered the flag
        status: String,
    },

    // Batch and sweep events
    /// A batch of receipts finished processing.
    BatchCompleted {
        /// Receipts submitted in the batch
        total_processed: usize,
        /// Runs that reached a terminal status
        successful: usize,
        /// Runs that errored out
        failed: usize,
        /// Total batch duration in milliseconds
        duration_ms: u64,
    },
    /// A periodic rescan sweep finished queueing candidates.
    SweepCompleted {
        /// Receipts queued for reprocessing
        queued: usize,
        /// Lookback window in days
        window_days: i64,
        /// Receipts at or above this fraud score were skipped
        max_score: i64,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::RunStarted { .. } => "run_started",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunRetryScheduled { .. } => "run_retry_scheduled",
            Self::RunFailed { .. } => "run_failed",
            Self::ReportFlagged { .. } => "report_flagged",
            Self::BatchCompleted { .. } => "batch_completed",
            Self::SweepCompleted { .. } => "sweep_completed",
        }
    }

    /// Extract receipt_id if this event is receipt-related
    pub fn receipt_id(&self) -> Option<&str> {
        match self {
            Self::RunStarted { receipt_id, .. }
            | Self::RunCompleted { receipt_id, .. }
            | Self::RunRetryScheduled { receipt_id, .. }
            | Self::RunFailed { receipt_id, .. }
            | Self::ReportFlagged { receipt_id, .. } => Some(receipt_id),
            _ => None,
        }
    }

    /// Extract report_id if this event is report-related
    pub fn report_id(&self) -> Option<&str> {
        match self {
            Self::RunStarted { report_id, .. } | Self::ReportFlagged { report_id, .. } => {
                Some(report_id)
            }
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub receipt_id: Option<String>,
    pub report_id: Option<String>,
    pub data: AuditEvent,
}
