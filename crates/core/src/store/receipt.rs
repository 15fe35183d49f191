//! Storage traits for receipts and expense reports.
//!
//! The orchestrator only ever talks to these traits; the SQLite
//! implementation lives in [`super::sqlite`].

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{ExpenseReportRecord, ReceiptRecord, ReceiptResults, ReportStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Receipt not found: {0}")]
    ReceiptNotFound(String),

    #[error("Report not found: {0}")]
    ReportNotFound(String),
}

/// Trait for receipt storage.
pub trait ReceiptStore: Send + Sync {
    /// Insert a freshly uploaded receipt.
    fn create(&self, receipt: &ReceiptRecord) -> Result<(), StoreError>;

    /// Fetch a receipt by id.
    fn get(&self, receipt_id: &str) -> Result<Option<ReceiptRecord>, StoreError>;

    /// Persist the outcome of a run.
    fn save_results(&self, receipt_id: &str, results: &ReceiptResults) -> Result<(), StoreError>;

    /// Overwrite the audit trail with a failure note. Used as a
    /// best-effort annotation after retries are exhausted.
    fn annotate_failure(&self, receipt_id: &str, note: &str) -> Result<(), StoreError>;

    /// Sum of all non-null receipt totals on a report.
    fn report_total(&self, report_id: &str) -> Result<f64, StoreError>;

    /// Ids of receipts created at or after `since` whose fraud score is
    /// strictly below `max_score`, in creation order. Feeds the periodic
    /// rescan sweep.
    fn rescan_candidates(
        &self,
        since: DateTime<Utc>,
        max_score: i64,
    ) -> Result<Vec<String>, StoreError>;
}

/// Trait for expense report storage.
pub trait ReportStore: Send + Sync {
    /// Insert a new report.
    fn create(&self, report: &ExpenseReportRecord) -> Result<(), StoreError>;

    /// Fetch a report by id.
    fn get(&self, report_id: &str) -> Result<Option<ExpenseReportRecord>, StoreError>;

    /// Move a report to a new status.
    fn set_status(&self, report_id: &str, status: ReportStatus) -> Result<(), StoreError>;

    /// Overwrite the running total.
    fn set_total(&self, report_id: &str, total: f64) -> Result<(), StoreError>;
}
